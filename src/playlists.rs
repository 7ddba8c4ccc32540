use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::backend::{BackendError, BackendResult};
use crate::messages::UNKNOWN_TRACK_TITLE;
use crate::models::TrackRef;

/// One line of `yt-dlp -j --flat-playlist` output. Only what we use.
#[derive(Deserialize)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: Option<String>,
    pub duration: Option<f64>,
}

impl PlaylistEntry {
    fn into_track(self) -> TrackRef {
        let duration = self
            .duration
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);

        let title = self.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string());

        TrackRef::new(title, self.url, duration)
    }
}

pub async fn tracks_from_playlist_url(url: &str) -> BackendResult<Vec<TrackRef>> {
    info!("Getting tracks from playlist {url}");

    let output = Command::new("yt-dlp")
        .arg("-j")
        .arg("--flat-playlist")
        .arg(url)
        .output()
        .await
        .map_err(|why| BackendError::Playlist(format!("yt-dlp failed to start: {why}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    if stdout.trim().is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendError::Playlist(stderr.trim().to_string()));
    }

    Ok(parse_flat_playlist(&stdout))
}

/// Parses newline-delimited JSON entries, skipping lines that do not parse.
pub fn parse_flat_playlist(output: &str) -> Vec<TrackRef> {
    let lines: Vec<&str> = output.lines().filter(|line| !line.trim().is_empty()).collect();

    let tracks: Vec<TrackRef> = lines
        .iter()
        .filter_map(|line| serde_json::from_str::<PlaylistEntry>(line).ok())
        .map(PlaylistEntry::into_track)
        .collect();

    if tracks.len() < lines.len() {
        warn!("{} playlist entries skipped due to errors during parsing", lines.len() - tracks.len());
    }

    tracks
}
