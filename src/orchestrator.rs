//! Per-guild playback operations exposed to the command surface.
//!
//! Every operation looks the guild's session up in the registry, then works
//! under that session's lock. Backend round trips happen while the lock is held
//! so one guild's commands and events never interleave, but nothing here holds
//! a lock that spans guilds.

use std::sync::Arc;

use rand::thread_rng;
use serenity::model::id::{ChannelId, GuildId};
use tracing::{info, warn};

use crate::backend::{AudioBackend, BackendError};
use crate::error::{PlaybackError, PlaybackResult};
use crate::messages;
use crate::models::{PlaybackState, TrackRef};
use crate::notifier::{MessageSink, Notifier};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::session::GuildSession;

#[derive(Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The session was idle; `track` started and `queued` more were appended.
    Started { track: TrackRef, queued: usize },
    /// Something was already playing; `count` tracks were appended.
    Queued { first: TrackRef, count: usize },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShuffleOutcome {
    pub shuffled: usize,
    /// Shuffling an idle session starts the new queue head.
    pub started: Option<TrackRef>,
}

pub struct Orchestrator {
    backend: Arc<dyn AudioBackend>,
    registry: SessionRegistry,
    notifier: Notifier,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn AudioBackend>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            backend,
            registry: SessionRegistry::new(),
            notifier: Notifier::new(sink),
        }
    }

    pub fn backend(&self) -> &dyn AudioBackend {
        self.backend.as_ref()
    }

    pub fn session(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.registry.get(guild_id)
    }

    #[cfg(test)]
    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.registry.contains(guild_id)
    }

    pub fn is_loop(&self, guild_id: GuildId) -> bool {
        self.registry.is_loop(guild_id)
    }

    pub async fn notify(&self, guild_id: GuildId, text: &str) {
        self.notifier.notify(guild_id, text).await;
    }

    pub async fn join(&self, guild_id: GuildId, voice_channel: ChannelId, text_channel: ChannelId) -> PlaybackResult<()> {
        self.backend.join(guild_id, voice_channel).await?;

        let (session, created) = self.registry.get_or_create(guild_id, voice_channel);
        if !created {
            session.lock().await.voice_channel = voice_channel;
        }

        self.notifier.bind(guild_id, text_channel);
        info!(
            guild_id = guild_id.0,
            channel_id = voice_channel.0,
            created,
            "Joined voice channel, {} active sessions",
            self.registry.len()
        );

        Ok(())
    }

    /// Disconnects and destroys the session. The session is gone even if the backend call fails.
    pub async fn leave(&self, guild_id: GuildId) -> PlaybackResult<()> {
        if !self.registry.contains(guild_id) {
            return Err(PlaybackError::NotConnected);
        }

        let result = self.backend.leave(guild_id).await;
        self.teardown(guild_id);

        result.map_err(PlaybackError::from)
    }

    /// Drops a session whose voice connection went away without us asking.
    pub async fn forget(&self, guild_id: GuildId) {
        if !self.teardown(guild_id) {
            return;
        }

        if let Err(why) = self.backend.leave(guild_id).await {
            info!(guild_id = guild_id.0, "Backend cleanup after disconnect: {why}");
        }
    }

    fn teardown(&self, guild_id: GuildId) -> bool {
        self.notifier.unbind(guild_id);
        let removed = self.registry.remove(guild_id).is_some();

        if removed {
            info!(guild_id = guild_id.0, "Session destroyed");
        }

        removed
    }

    async fn ensure_session(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
        text_channel: ChannelId,
    ) -> PlaybackResult<SessionHandle> {
        if let Some(session) = self.registry.get(guild_id) {
            return Ok(session);
        }

        let voice_channel = voice_channel.ok_or(PlaybackError::UserNotInVoice)?;
        self.join(guild_id, voice_channel, text_channel).await?;

        self.registry.get(guild_id).ok_or(PlaybackError::NotConnected)
    }

    /// Resolves `query` and either starts the first result or queues everything.
    ///
    /// Joins `voice_channel` first when the guild has no session yet.
    pub async fn play_or_queue(
        &self,
        guild_id: GuildId,
        query: &str,
        voice_channel: Option<ChannelId>,
        text_channel: ChannelId,
    ) -> PlaybackResult<PlayOutcome> {
        let query = query.trim();
        let handle = self.ensure_session(guild_id, voice_channel, text_channel).await?;

        info!(guild_id = guild_id.0, "User input is {query}");

        let tracks = match self.backend.search(query).await {
            Ok(tracks) => tracks,
            Err(why) => {
                warn!(guild_id = guild_id.0, "Search for {query} failed: {why}");
                Vec::new()
            }
        };

        if tracks.is_empty() {
            return Err(PlaybackError::TrackNotFound(query.to_string()));
        }

        let mut session = handle.lock().await;

        // A leave may have landed while the search was in flight.
        match self.registry.get(guild_id) {
            Some(live) if Arc::ptr_eq(&live, &handle) => {}
            _ => return Err(PlaybackError::NotConnected),
        }

        if session.current().is_some() {
            let first = tracks[0].clone();
            let count = session.enqueue_all(tracks);
            info!(guild_id = guild_id.0, "Queued {count} tracks");

            return Ok(PlayOutcome::Queued { first, count });
        }

        let already_queued = session.queue().len();
        session.enqueue_front(tracks);

        let Some(track) = self.start_next(&mut session).await else {
            return Err(PlaybackError::BackendUnavailable(BackendError::Load {
                input: query.to_string(),
                reason: "none of the results could be played".to_string(),
            }));
        };
        let queued = session.queue().len().saturating_sub(already_queued);

        Ok(PlayOutcome::Started { track, queued })
    }

    pub async fn pause(&self, guild_id: GuildId) -> PlaybackResult<TrackRef> {
        let session = self.registry.get(guild_id).ok_or(PlaybackError::NothingToPause)?;
        let mut session = session.lock().await;

        let track = match (session.state(), session.current_track()) {
            (PlaybackState::Playing, Some(track)) => track.clone(),
            _ => return Err(PlaybackError::NothingToPause),
        };

        self.backend.pause(guild_id).await?;
        session.set_paused(true);

        Ok(track)
    }

    pub async fn resume(&self, guild_id: GuildId) -> PlaybackResult<TrackRef> {
        let session = self.registry.get(guild_id).ok_or(PlaybackError::NothingToResume)?;
        let mut session = session.lock().await;

        let track = match (session.state(), session.current_track()) {
            (PlaybackState::Paused, Some(track)) => track.clone(),
            _ => return Err(PlaybackError::NothingToResume),
        };

        self.backend.resume(guild_id).await?;
        session.set_paused(false);

        Ok(track)
    }

    /// Stops the current track, keeping the queue. Returns what was stopped, if anything.
    pub async fn stop(&self, guild_id: GuildId) -> PlaybackResult<Option<TrackRef>> {
        let Some(session) = self.registry.get(guild_id) else {
            return Ok(None);
        };
        let mut session = session.lock().await;

        let Some(now) = session.clear_current() else {
            return Ok(None);
        };

        if let Err(why) = self.backend.stop(guild_id, &now.track).await {
            warn!(guild_id = guild_id.0, "Backend stop of {} failed: {why}", now.track.title);
        }

        Ok(Some(now.track))
    }

    /// Stops the current track and starts the next queued one. Returns the new track, if any.
    pub async fn skip(&self, guild_id: GuildId) -> PlaybackResult<Option<TrackRef>> {
        let session = self.registry.get(guild_id).ok_or(PlaybackError::NotConnected)?;
        let mut session = session.lock().await;

        info!(guild_id = guild_id.0, "Skip with {} tracks queued", session.queue().len());

        if let Some(now) = session.clear_current() {
            if let Err(why) = self.backend.stop(guild_id, &now.track).await {
                warn!(guild_id = guild_id.0, "Backend stop of {} failed: {why}", now.track.title);
            }
        }

        Ok(self.start_next(&mut session).await)
    }

    pub fn toggle_loop(&self, guild_id: GuildId) -> PlaybackResult<bool> {
        if !self.registry.contains(guild_id) {
            return Err(PlaybackError::NotConnected);
        }

        let enabled = self.registry.toggle_loop(guild_id);
        info!(guild_id = guild_id.0, enabled, "Loop toggled");

        Ok(enabled)
    }

    pub async fn list_queue(&self, guild_id: GuildId) -> Vec<TrackRef> {
        let Some(session) = self.registry.get(guild_id) else {
            return Vec::new();
        };
        let session = session.lock().await;

        session.queue().iter().cloned().collect()
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<(TrackRef, PlaybackState)> {
        let session = self.registry.get(guild_id)?;
        let session = session.lock().await;

        session.current_track().map(|track| (track.clone(), session.state()))
    }

    pub async fn clear_queue(&self, guild_id: GuildId) -> usize {
        let Some(session) = self.registry.get(guild_id) else {
            return 0;
        };
        let cleared = session.lock().await.clear();

        cleared
    }

    pub async fn remove_from_queue(&self, guild_id: GuildId, index: usize) -> PlaybackResult<TrackRef> {
        let session = self
            .registry
            .get(guild_id)
            .ok_or(PlaybackError::OutOfRange { index, len: 0 })?;
        let mut session = session.lock().await;

        session.remove_at(index)
    }

    /// Shuffles the queue. If nothing is playing, the new head starts right away.
    pub async fn shuffle_queue(&self, guild_id: GuildId) -> PlaybackResult<ShuffleOutcome> {
        let Some(session) = self.registry.get(guild_id) else {
            return Ok(ShuffleOutcome::default());
        };
        let mut session = session.lock().await;

        let shuffled = session.queue().len();
        if shuffled == 0 {
            return Ok(ShuffleOutcome::default());
        }

        session.shuffle(&mut thread_rng());

        let started = if session.current().is_none() {
            self.start_next(&mut session).await
        } else {
            None
        };

        Ok(ShuffleOutcome { shuffled, started })
    }

    /// Starts `track` at the backend and makes it the session's current track.
    pub async fn start(&self, session: &mut GuildSession, track: TrackRef) -> PlaybackResult<()> {
        let play_id = self.backend.play(session.guild_id, &track).await?;
        info!(guild_id = session.guild_id.0, "Playing {} - {} ({play_id})", track.title, track.url);
        session.set_playing(track, play_id);

        Ok(())
    }

    /// Advances through the queue until a track starts or the queue runs dry.
    ///
    /// Tracks that fail to start are reported and dropped.
    pub async fn start_next(&self, session: &mut GuildSession) -> Option<TrackRef> {
        while let Some(track) = session.advance_to_next() {
            match self.start(session, track.clone()).await {
                Ok(()) => return Some(track),
                Err(why) => {
                    warn!(guild_id = session.guild_id.0, "Next track failed: {why}");
                    let reason = match why {
                        PlaybackError::BackendUnavailable(inner) => inner.to_string(),
                        other => other.to_string(),
                    };
                    self.notify(session.guild_id, &messages::could_not_play(&track, &reason)).await;
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlayId;
    use crate::testing::{track, BackendCall, MockBackend, RecordingSink};

    const GUILD: GuildId = GuildId(1);
    const VOICE: ChannelId = ChannelId(10);
    const TEXT: ChannelId = ChannelId(100);

    fn orchestrator() -> (Arc<Orchestrator>, Arc<MockBackend>, Arc<RecordingSink>) {
        let backend = Arc::new(MockBackend::default());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(Orchestrator::new(backend.clone(), sink.clone()));
        (orchestrator, backend, sink)
    }

    async fn joined() -> (Arc<Orchestrator>, Arc<MockBackend>, Arc<RecordingSink>) {
        let (orchestrator, backend, sink) = orchestrator();
        orchestrator.join(GUILD, VOICE, TEXT).await.unwrap();
        (orchestrator, backend, sink)
    }

    async fn queue_titles(orchestrator: &Orchestrator) -> Vec<String> {
        orchestrator
            .list_queue(GUILD)
            .await
            .into_iter()
            .map(|track| track.title)
            .collect()
    }

    async fn state(orchestrator: &Orchestrator) -> PlaybackState {
        let session = orchestrator.session(GUILD).unwrap();
        let state = session.lock().await.state();
        state
    }

    async fn start_playing(orchestrator: &Orchestrator, backend: &MockBackend, title: &str) {
        backend.add_results(title, vec![track(title)]);
        orchestrator.play_or_queue(GUILD, title, Some(VOICE), TEXT).await.unwrap();
    }

    #[tokio::test]
    async fn play_while_idle_starts_without_touching_queue() {
        let (orchestrator, backend, _) = joined().await;
        {
            let session = orchestrator.session(GUILD).unwrap();
            let mut session = session.lock().await;
            session.enqueue(track("A"));
            session.enqueue(track("B"));
        }
        backend.add_results("C", vec![track("C")]);

        let outcome = orchestrator.play_or_queue(GUILD, "C", Some(VOICE), TEXT).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started { track: track("C"), queued: 0 });
        assert_eq!(queue_titles(&orchestrator).await, vec!["A", "B"]);
        assert_eq!(state(&orchestrator).await, PlaybackState::Playing);
        assert_eq!(backend.plays(), vec![track("C").url]);
    }

    #[tokio::test]
    async fn play_while_playing_enqueues_all_results() {
        let (orchestrator, backend, _) = joined().await;
        start_playing(&orchestrator, &backend, "A").await;
        backend.add_results("list", vec![track("B"), track("C")]);

        let outcome = orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Queued { first: track("B"), count: 2 });
        assert_eq!(queue_titles(&orchestrator).await, vec!["B", "C"]);
        assert_eq!(backend.plays().len(), 1);
    }

    #[tokio::test]
    async fn play_multiple_results_while_idle_queues_remainder() {
        let (orchestrator, backend, _) = joined().await;
        backend.add_results("list", vec![track("A"), track("B"), track("C")]);

        let outcome = orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started { track: track("A"), queued: 2 });
        assert_eq!(queue_titles(&orchestrator).await, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn play_skips_results_that_fail_to_start() {
        let (orchestrator, backend, sink) = joined().await;
        backend.add_results("list", vec![track("A"), track("B"), track("C")]);
        backend.fail_play(&track("A").url);

        let outcome = orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started { track: track("B"), queued: 1 });
        assert_eq!(queue_titles(&orchestrator).await, vec!["C"]);
        assert_eq!(state(&orchestrator).await, PlaybackState::Playing);
        assert_eq!(backend.plays(), vec![track("B").url]);

        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Could not play `A`"));
    }

    #[tokio::test]
    async fn play_with_nothing_playable_stays_idle() {
        let (orchestrator, backend, sink) = joined().await;
        backend.add_results("A", vec![track("A")]);
        backend.fail_play(&track("A").url);

        let err = orchestrator.play_or_queue(GUILD, "A", None, TEXT).await.unwrap_err();

        assert!(matches!(err, PlaybackError::BackendUnavailable(_)));
        assert_eq!(state(&orchestrator).await, PlaybackState::Idle);
        assert!(queue_titles(&orchestrator).await.is_empty());
        assert_eq!(sink.texts().len(), 1);
    }

    #[tokio::test]
    async fn leave_during_search_is_not_undone_by_play() {
        let (orchestrator, backend, _) = joined().await;
        backend.add_results("A", vec![track("A")]);
        let gate = backend.gate_searches();

        let pending = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.play_or_queue(GUILD, "A", None, TEXT).await }
        });
        while backend.count(|call| matches!(call, BackendCall::Search(_))) == 0 {
            tokio::task::yield_now().await;
        }

        orchestrator.leave(GUILD).await.unwrap();
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, PlaybackError::NotConnected));
        assert!(backend.plays().is_empty());
        assert!(!orchestrator.has_session(GUILD));
    }

    #[tokio::test]
    async fn play_auto_joins_invoker_channel() {
        let (orchestrator, backend, _) = orchestrator();
        backend.add_results("A", vec![track("A")]);

        orchestrator.play_or_queue(GUILD, "A", Some(VOICE), TEXT).await.unwrap();

        assert!(orchestrator.has_session(GUILD));
        assert_eq!(backend.calls()[0], BackendCall::Join(GUILD, VOICE));
    }

    #[tokio::test]
    async fn play_without_session_or_voice_fails() {
        let (orchestrator, backend, _) = orchestrator();
        backend.add_results("A", vec![track("A")]);

        let err = orchestrator.play_or_queue(GUILD, "A", None, TEXT).await.unwrap_err();

        assert!(matches!(err, PlaybackError::UserNotInVoice));
        assert!(!orchestrator.has_session(GUILD));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_or_failed_search_is_track_not_found() {
        let (orchestrator, backend, _) = joined().await;
        backend.fail_search("broken");

        let empty = orchestrator.play_or_queue(GUILD, "nothing", None, TEXT).await.unwrap_err();
        let failed = orchestrator.play_or_queue(GUILD, "broken", None, TEXT).await.unwrap_err();

        assert!(matches!(empty, PlaybackError::TrackNotFound(query) if query == "nothing"));
        assert!(matches!(failed, PlaybackError::TrackNotFound(_)));
        assert_eq!(state(&orchestrator).await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn pause_and_resume_follow_state_machine() {
        let (orchestrator, backend, _) = joined().await;

        assert!(matches!(orchestrator.pause(GUILD).await, Err(PlaybackError::NothingToPause)));
        assert!(matches!(orchestrator.resume(GUILD).await, Err(PlaybackError::NothingToResume)));

        start_playing(&orchestrator, &backend, "A").await;
        assert!(matches!(orchestrator.resume(GUILD).await, Err(PlaybackError::NothingToResume)));

        assert_eq!(orchestrator.pause(GUILD).await.unwrap(), track("A"));
        assert_eq!(state(&orchestrator).await, PlaybackState::Paused);
        assert!(matches!(orchestrator.pause(GUILD).await, Err(PlaybackError::NothingToPause)));

        assert_eq!(orchestrator.resume(GUILD).await.unwrap(), track("A"));
        assert_eq!(state(&orchestrator).await, PlaybackState::Playing);
        assert_eq!(backend.count(|call| matches!(call, BackendCall::Pause(_))), 1);
        assert_eq!(backend.count(|call| matches!(call, BackendCall::Resume(_))), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_keeps_queue() {
        let (orchestrator, backend, _) = joined().await;
        backend.add_results("list", vec![track("A"), track("B")]);
        orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        assert_eq!(orchestrator.stop(GUILD).await.unwrap(), Some(track("A")));
        assert_eq!(orchestrator.stop(GUILD).await.unwrap(), None);

        assert_eq!(state(&orchestrator).await, PlaybackState::Idle);
        assert_eq!(queue_titles(&orchestrator).await, vec!["B"]);
        assert_eq!(backend.count(|call| matches!(call, BackendCall::Stop(..))), 1);
    }

    #[tokio::test]
    async fn skip_advances_and_discards_pause() {
        let (orchestrator, backend, _) = joined().await;
        backend.add_results("list", vec![track("A"), track("B"), track("C")]);
        orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();
        orchestrator.pause(GUILD).await.unwrap();

        let next = orchestrator.skip(GUILD).await.unwrap();

        assert_eq!(next, Some(track("B")));
        assert!(backend.calls().contains(&BackendCall::Stop(GUILD, track("A").url)));
        assert_eq!(queue_titles(&orchestrator).await, vec!["C"]);
        assert_eq!(state(&orchestrator).await, PlaybackState::Playing);
        assert_eq!(backend.count(|call| matches!(call, BackendCall::Resume(_))), 0);
    }

    #[tokio::test]
    async fn skip_on_last_track_ends_idle() {
        let (orchestrator, backend, _) = joined().await;
        start_playing(&orchestrator, &backend, "A").await;

        assert_eq!(orchestrator.skip(GUILD).await.unwrap(), None);
        assert_eq!(state(&orchestrator).await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn skip_drops_tracks_that_fail_to_start() {
        let (orchestrator, backend, sink) = joined().await;
        backend.add_results("list", vec![track("A"), track("B"), track("C")]);
        backend.fail_play(&track("B").url);
        orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        let next = orchestrator.skip(GUILD).await.unwrap();

        assert_eq!(next, Some(track("C")));
        assert!(queue_titles(&orchestrator).await.is_empty());
        assert!(sink.texts().iter().any(|text| text.starts_with("Could not play `B`")));
    }

    #[tokio::test]
    async fn skip_without_session_is_not_connected() {
        let (orchestrator, _, _) = orchestrator();

        assert!(matches!(orchestrator.skip(GUILD).await, Err(PlaybackError::NotConnected)));
    }

    #[tokio::test]
    async fn toggle_loop_round_trips() {
        let (orchestrator, _, _) = joined().await;

        assert!(orchestrator.toggle_loop(GUILD).unwrap());
        assert!(!orchestrator.toggle_loop(GUILD).unwrap());
        assert!(!orchestrator.is_loop(GUILD));
    }

    #[tokio::test]
    async fn remove_out_of_range_leaves_queue() {
        let (orchestrator, backend, _) = joined().await;
        backend.add_results("list", vec![track("A"), track("B"), track("C"), track("D")]);
        orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        let err = orchestrator.remove_from_queue(GUILD, 5).await.unwrap_err();

        assert!(matches!(err, PlaybackError::OutOfRange { index: 5, len: 3 }));
        assert_eq!(queue_titles(&orchestrator).await, vec!["B", "C", "D"]);
        assert_eq!(orchestrator.remove_from_queue(GUILD, 2).await.unwrap(), track("C"));
    }

    #[tokio::test]
    async fn clear_queue_keeps_current() {
        let (orchestrator, backend, _) = joined().await;
        backend.add_results("list", vec![track("A"), track("B")]);
        orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        assert_eq!(orchestrator.clear_queue(GUILD).await, 1);
        assert_eq!(orchestrator.clear_queue(GUILD).await, 0);
        assert_eq!(state(&orchestrator).await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn shuffle_while_idle_starts_new_head() {
        let (orchestrator, _, _) = joined().await;
        {
            let session = orchestrator.session(GUILD).unwrap();
            let mut session = session.lock().await;
            session.enqueue_all(["A", "B", "C"].map(track));
        }

        let outcome = orchestrator.shuffle_queue(GUILD).await.unwrap();

        let started = outcome.started.expect("idle shuffle starts playback");
        assert_eq!(outcome.shuffled, 3);
        let mut all = queue_titles(&orchestrator).await;
        all.push(started.title);
        all.sort();
        assert_eq!(all, vec!["A", "B", "C"]);
        assert_eq!(state(&orchestrator).await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn shuffle_while_playing_only_reorders() {
        let (orchestrator, backend, _) = joined().await;
        backend.add_results("list", vec![track("A"), track("B"), track("C")]);
        orchestrator.play_or_queue(GUILD, "list", None, TEXT).await.unwrap();

        let outcome = orchestrator.shuffle_queue(GUILD).await.unwrap();

        assert_eq!(outcome, ShuffleOutcome { shuffled: 2, started: None });
        let mut titles = queue_titles(&orchestrator).await;
        titles.sort();
        assert_eq!(titles, vec!["B", "C"]);
        assert_eq!(backend.plays().len(), 1);
    }

    #[tokio::test]
    async fn shuffle_of_empty_queue_is_noop() {
        let (orchestrator, backend, _) = joined().await;

        assert_eq!(orchestrator.shuffle_queue(GUILD).await.unwrap(), ShuffleOutcome::default());
        assert!(backend.plays().is_empty());
    }

    #[tokio::test]
    async fn leave_destroys_session_and_guild_state() {
        let (orchestrator, _, sink) = joined().await;
        orchestrator.toggle_loop(GUILD).unwrap();

        orchestrator.leave(GUILD).await.unwrap();

        assert!(!orchestrator.has_session(GUILD));
        assert!(!orchestrator.is_loop(GUILD));
        orchestrator.notify(GUILD, "anyone?").await;
        assert!(sink.messages().is_empty());
        assert!(matches!(orchestrator.leave(GUILD).await, Err(PlaybackError::NotConnected)));
    }

    #[tokio::test]
    async fn start_records_backend_playback() {
        let (orchestrator, _, _) = joined().await;
        let session = orchestrator.session(GUILD).unwrap();
        let mut session = session.lock().await;

        orchestrator.start(&mut session, track("A")).await.unwrap();

        assert!(session.is_current(PlayId(1)));
    }

    enum Op {
        Enqueued,
        Removed(String),
        Cleared(usize),
        Rejected,
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueue_remove_and_clear_lose_nothing() {
        let (orchestrator, backend, _) = joined().await;
        start_playing(&orchestrator, &backend, "now").await;
        for i in 0..40 {
            let title = format!("t{i}");
            backend.add_results(&title, vec![track(&title)]);
        }

        let mut tasks = Vec::new();
        for i in 0..40 {
            let orchestrator = orchestrator.clone();
            tasks.push(tokio::spawn(async move {
                match orchestrator.play_or_queue(GUILD, &format!("t{i}"), None, TEXT).await {
                    Ok(_) => Op::Enqueued,
                    Err(_) => Op::Rejected,
                }
            }));
        }
        for _ in 0..15 {
            let orchestrator = orchestrator.clone();
            tasks.push(tokio::spawn(async move {
                match orchestrator.remove_from_queue(GUILD, 1).await {
                    Ok(track) => Op::Removed(track.title),
                    Err(_) => Op::Rejected,
                }
            }));
        }
        for _ in 0..3 {
            let orchestrator = orchestrator.clone();
            tasks.push(tokio::spawn(async move {
                Op::Cleared(orchestrator.clear_queue(GUILD).await)
            }));
        }

        let (mut enqueued, mut cleared) = (0, 0);
        let mut removed = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Op::Enqueued => enqueued += 1,
                Op::Removed(title) => removed.push(title),
                Op::Cleared(count) => cleared += count,
                Op::Rejected => {}
            }
        }

        let remaining = queue_titles(&orchestrator).await;
        assert_eq!(enqueued, 40);
        assert_eq!(remaining.len(), enqueued - removed.len() - cleared);

        let mut seen: Vec<String> = remaining.into_iter().chain(removed).collect();
        let before_dedup = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), before_dedup);
        assert!(seen.iter().all(|title| title.starts_with('t')));
    }
}
