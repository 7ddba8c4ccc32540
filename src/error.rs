//! Failures surfaced by the orchestrator's public operations.
//!
//! The `Display` text of [`PlaybackError`] is what the command surface shows
//! to users. Backend error text only ever appears as a suffix.

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The invoker must be in a voice channel for this command.
    #[error("You must be connected to a voice channel to execute this command!")]
    UserNotInVoice,

    /// The guild has no live session to act on.
    #[error("I'm not connected to a voice channel.")]
    NotConnected,

    /// Search returned nothing usable.
    #[error("I wasn't able to find anything for `{0}`.")]
    TrackNotFound(String),

    #[error("Nothing to pause.")]
    NothingToPause,

    #[error("Nothing to resume.")]
    NothingToResume,

    /// 1-based queue index outside `1..=len`.
    #[error("The track number '{index}' does not exist in the queue.")]
    OutOfRange { index: usize, len: usize },

    #[error("The audio backend is unavailable ({0}).")]
    BackendUnavailable(#[from] BackendError),

    /// An event referenced a guild whose session is already gone. Benign.
    #[error("No session for this guild.")]
    SessionMissing,
}

impl PlaybackError {
    /// Whether this failure is expected noise rather than something to log loudly.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::SessionMissing)
    }
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
