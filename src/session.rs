use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serenity::model::id::{ChannelId, GuildId};
use tracing::info;

use crate::error::{PlaybackError, PlaybackResult};
use crate::models::{NowPlaying, PlayId, PlaybackState, TrackRef};

/// Queue and playback state for one guild.
///
/// Callers hold the session behind a per-guild lock, so every method here runs
/// with exclusive access. `queue` never holds the playback in `current`.
pub struct GuildSession {
    pub guild_id: GuildId,
    pub voice_channel: ChannelId,
    queue: VecDeque<TrackRef>,
    current: Option<NowPlaying>,
    paused: bool,
}

impl GuildSession {
    pub fn new(guild_id: GuildId, voice_channel: ChannelId) -> Self {
        Self {
            guild_id,
            voice_channel,
            queue: VecDeque::new(),
            current: None,
            paused: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match (&self.current, self.paused) {
            (None, _) => PlaybackState::Idle,
            (Some(_), false) => PlaybackState::Playing,
            (Some(_), true) => PlaybackState::Paused,
        }
    }

    pub fn current(&self) -> Option<&NowPlaying> {
        self.current.as_ref()
    }

    pub fn current_track(&self) -> Option<&TrackRef> {
        self.current.as_ref().map(|now| &now.track)
    }

    /// True when `play_id` identifies the playback this session considers current.
    pub fn is_current(&self, play_id: PlayId) -> bool {
        self.current.as_ref().is_some_and(|now| now.play_id == play_id)
    }

    pub fn queue(&self) -> &VecDeque<TrackRef> {
        &self.queue
    }

    pub fn enqueue(&mut self, track: TrackRef) {
        self.queue.push_back(track);
    }

    pub fn enqueue_all(&mut self, tracks: impl IntoIterator<Item = TrackRef>) -> usize {
        let before = self.queue.len();
        self.queue.extend(tracks);
        self.queue.len() - before
    }

    /// Puts `tracks` ahead of everything already queued, keeping their order.
    pub fn enqueue_front(&mut self, tracks: Vec<TrackRef>) -> usize {
        let count = tracks.len();

        for track in tracks.into_iter().rev() {
            self.queue.push_front(track);
        }

        count
    }

    /// Removes the track at a 1-based position as shown in the queue listing.
    pub fn remove_at(&mut self, index: usize) -> PlaybackResult<TrackRef> {
        let len = self.queue.len();

        index
            .checked_sub(1)
            .and_then(|position| self.queue.remove(position))
            .ok_or(PlaybackError::OutOfRange { index, len })
    }

    /// Empties the queue and returns how many tracks were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.queue.make_contiguous().shuffle(rng);
    }

    /// Pops the queue head, dropping whatever was current.
    ///
    /// The returned track is not current until [`GuildSession::set_playing`]
    /// records the backend playback that carries it.
    pub fn advance_to_next(&mut self) -> Option<TrackRef> {
        self.current = None;
        self.paused = false;

        let next = self.queue.pop_front();

        match &next {
            None => info!(guild_id = self.guild_id.0, "Queue is empty"),
            Some(track) => info!(guild_id = self.guild_id.0, "Next track is {} - {}", track.title, track.url),
        }

        next
    }

    /// Records a newly started playback. New playbacks always start unpaused.
    pub fn set_playing(&mut self, track: TrackRef, play_id: PlayId) {
        self.current = Some(NowPlaying { track, play_id });
        self.paused = false;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Drops the current playback without touching the queue.
    pub fn clear_current(&mut self) -> Option<NowPlaying> {
        self.paused = false;
        self.current.take()
    }
}
