//! Boundary to the external audio backend.
//!
//! The orchestrator only talks to [`AudioBackend`]. Whatever sits behind it
//! decodes and streams audio, and reports track lifecycle changes as
//! [`BackendEvent`]s on a channel handed to it at construction.

use std::time::Duration;

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use thiserror::Error;

use crate::models::{PlayId, TrackRef};

pub mod voice;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("could not load `{input}`: {reason}")]
    Load { input: String, reason: String },

    #[error("voice connection failed: {0}")]
    Connection(String),

    #[error("no voice connection for guild {0}")]
    NoConnection(u64),

    #[error("no active track")]
    NoTrack,

    #[error("track control failed: {0}")]
    Control(String),

    #[error("playlist lookup failed: {0}")]
    Playlist(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Resolves a URL or free-text query. An empty list means nothing matched.
    async fn search(&self, query: &str) -> BackendResult<Vec<TrackRef>>;

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> BackendResult<()>;

    async fn leave(&self, guild_id: GuildId) -> BackendResult<()>;

    /// Starts `track`, replacing anything already playing in the guild.
    async fn play(&self, guild_id: GuildId, track: &TrackRef) -> BackendResult<PlayId>;

    async fn pause(&self, guild_id: GuildId) -> BackendResult<()>;

    async fn resume(&self, guild_id: GuildId) -> BackendResult<()>;

    async fn stop(&self, guild_id: GuildId, track: &TrackRef) -> BackendResult<()>;
}

/// Why a playback ended, as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Played to completion, or its source gave out.
    Finished,
    /// Stopped explicitly, e.g. by skip or stop.
    Stopped,
    /// Another track was started over it.
    Replaced,
    /// The voice connection went away under it.
    Cleanup,
}

impl EndReason {
    /// Natural ends let the session move on; explicit ones were already handled by whoever caused them.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished)
    }
}

#[derive(Clone, Debug)]
pub enum TrackEventKind {
    Started,
    Ended(EndReason),
    Stuck { threshold: Duration },
    Exception { message: String },
}

#[derive(Clone, Debug)]
pub struct BackendEvent {
    pub guild_id: GuildId,
    pub play_id: PlayId,
    pub track: TrackRef,
    pub kind: TrackEventKind,
}

/// Treats anything that parses as an absolute http(s) URL as a direct link.
pub fn is_url(query: &str) -> bool {
    let query = query.trim();
    (query.starts_with("http://") || query.starts_with("https://")) && !query.contains(char::is_whitespace)
}

/// Playlist links are resolved entry by entry instead of as a single track.
pub fn is_playlist_url(query: &str) -> bool {
    is_url(query) && (query.contains("&list=") || query.contains("?list="))
}
