use std::fmt;
use std::time::Duration;

/// A playable item resolved by a backend search. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackRef {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
}

impl TrackRef {
    pub fn new(title: impl Into<String>, url: impl Into<String>, duration: Option<Duration>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            duration,
        }
    }
}

/// Identity of one backend playback. Two plays of the same track get different ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlayId(pub u64);

impl fmt::Display for PlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The track a session is currently playing, tied to the backend playback that carries it.
#[derive(Clone, Debug)]
pub struct NowPlaying {
    pub track: TrackRef,
    pub play_id: PlayId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}
