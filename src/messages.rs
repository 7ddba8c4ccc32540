use std::time::Duration;

use crate::models::TrackRef;

pub const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";

pub const LEFT_VOICE_CHANNEL: &str = "I've left the voice channel.";
pub const TRACK_STOPPED: &str = "Track stopped.";
pub const TRACK_RESUMED: &str = "Track is resumed.";
pub const TRACK_EMPTY: &str = "No track is playing.";
pub const LOOP_ENABLED: &str = "Loop has been enabled.";
pub const LOOP_DISABLED: &str = "Loop has been disabled.";
pub const QUEUE_EMPTY: &str = "The queue is empty.";
pub const QUEUE_CLEARED: &str = "The queue has been cleared.";
pub const QUEUE_SHUFFLED: &str = "The queue has been shuffled.";
pub const INVALID_NUMBER: &str = "Please provide a valid number.";
pub const INVALID_SEARCH: &str = "Please provide search terms.";

/// Discord rejects messages longer than this.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

pub const HELP: &str = r#"
**Commands:**
    **join** (`j`) - Joins your voice channel.
    **leave** (`l`) - Leaves the voice channel.
    **play [URL|Title]** (`p`) - Plays (or adds to the queue) tracks given a URL, a playlist URL or a title.
    **pause** (`pa`) - Pauses the current track.
    **resume** (`r`) - Resumes the paused track.
    **stop** (`st`) - Stops the current track. The queue is kept.
    **skip** (`s`) - Plays the next track.
    **loop** - Toggles replaying the current track.
    **queue** (`q`) - Shows the queue of tracks.
    **clear** (`c`) - Clears the queue.
    **remove [INDEX]** (`rm`) - Removes a track from the queue.
    **shuffle** (`sh`) - Reorders the queue randomly.
    "#;

pub fn inline_code(text: &str) -> String {
    format!("`{text}`")
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let display_seconds = seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:0>2}:{display_seconds:0>2}")
    } else {
        format!("{minutes}:{display_seconds:0>2}")
    }
}

fn describe(track: &TrackRef) -> String {
    match track.duration {
        Some(duration) => format!("{} ({})", inline_code(&track.title), format_duration(duration)),
        None => inline_code(&track.title),
    }
}

pub fn joined(channel_name: &str) -> String {
    format!("I've joined channel '{channel_name}'.")
}

pub fn now_playing(track: &TrackRef) -> String {
    format!("Now playing: {}", describe(track))
}

pub fn added_to_queue(track: &TrackRef) -> String {
    format!("Track {} added to the queue.", describe(track))
}

pub fn queued_total(count: usize) -> String {
    format!("Total of {count} tracks added to the queue.")
}

pub fn paused(track: &TrackRef) -> String {
    format!("Track paused: {}", inline_code(&track.title))
}

pub fn removed(track: &TrackRef) -> String {
    format!("The track {} has been removed from the queue.", inline_code(&track.title))
}

pub fn could_not_play(track: &TrackRef, reason: &str) -> String {
    format!("Could not play {} due to error {reason}", inline_code(&track.title))
}

pub fn track_stuck(track: &TrackRef, threshold: Duration) -> String {
    format!("{} was stuck for {}s, skipping.", inline_code(&track.title), threshold.as_secs())
}

pub fn track_exception(track: &TrackRef, message: &str) -> String {
    format!("{} threw an exception. Message: {message}", inline_code(&track.title))
}

/// Numbers the queue from 1 and splits it into messages under the length limit.
pub fn queue_pages(tracks: &[TrackRef]) -> Vec<String> {
    let mut pages = Vec::new();
    let mut page = String::new();

    for (index, track) in tracks.iter().enumerate() {
        let line = format!("{} - {}\n", index + 1, track.title);

        if !page.is_empty() && page.len() + line.len() > MAX_MESSAGE_LENGTH {
            pages.push(std::mem::take(&mut page));
        }

        page.push_str(&line);
    }

    if !page.is_empty() {
        pages.push(page);
    }

    pages
}
