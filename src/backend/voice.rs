//! [`AudioBackend`] over songbird voice connections and yt-dlp sources.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::{ytdl_search, Input};
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{ytdl, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::backend::{
    is_playlist_url, is_url, AudioBackend, BackendError, BackendEvent, BackendResult, EndReason,
    TrackEventKind,
};
use crate::messages::UNKNOWN_TRACK_TITLE;
use crate::models::{PlayId, TrackRef};
use crate::playlists::tracks_from_playlist_url;

/// Why we ended a playback ourselves, read by its end notifier.
#[derive(Default)]
struct Superseded(AtomicU8);

impl Superseded {
    const NONE: u8 = 0;
    const REPLACED: u8 = 1;
    const CLEANUP: u8 = 2;

    fn mark(&self, reason: EndReason) {
        let code = match reason {
            EndReason::Cleanup => Self::CLEANUP,
            _ => Self::REPLACED,
        };
        self.0.store(code, Ordering::Release);
    }

    fn reason(&self) -> Option<EndReason> {
        match self.0.load(Ordering::Acquire) {
            Self::NONE => None,
            Self::CLEANUP => Some(EndReason::Cleanup),
            _ => Some(EndReason::Replaced),
        }
    }
}

struct ActiveTrack {
    handle: TrackHandle,
    play_id: PlayId,
    superseded: Arc<Superseded>,
}

pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    events: UnboundedSender<BackendEvent>,
    tracks: DashMap<GuildId, ActiveTrack>,
    next_play_id: AtomicU64,
    stuck_threshold: Duration,
    self_deaf: bool,
}

impl SongbirdBackend {
    pub fn new(
        manager: Arc<Songbird>,
        events: UnboundedSender<BackendEvent>,
        stuck_threshold: Duration,
        self_deaf: bool,
    ) -> Self {
        Self {
            manager,
            events,
            tracks: DashMap::new(),
            next_play_id: AtomicU64::new(1),
            stuck_threshold,
            self_deaf,
        }
    }

    fn emit(&self, guild_id: GuildId, play_id: PlayId, track: &TrackRef, kind: TrackEventKind) {
        emit(&self.events, guild_id, play_id, track, kind);
    }
}

fn emit(
    events: &UnboundedSender<BackendEvent>,
    guild_id: GuildId,
    play_id: PlayId,
    track: &TrackRef,
    kind: TrackEventKind,
) {
    let event = BackendEvent {
        guild_id,
        play_id,
        track: track.clone(),
        kind,
    };

    if events.send(event).is_err() {
        warn!(guild_id = guild_id.0, "Event reconciler is gone, dropping track event");
    }
}

fn load_error(input: &str, why: impl std::fmt::Display) -> BackendError {
    BackendError::Load {
        input: input.to_string(),
        reason: why.to_string(),
    }
}

fn control_error(why: impl std::fmt::Debug) -> BackendError {
    BackendError::Control(format!("{why:?}"))
}

fn track_from_input(input: &Input) -> Option<TrackRef> {
    let url = input.metadata.source_url.clone()?;
    let title = input
        .metadata
        .title
        .clone()
        .unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string());

    Some(TrackRef::new(title, url, input.metadata.duration))
}

fn end_reason(mode: &PlayMode) -> EndReason {
    match mode {
        PlayMode::Stop => EndReason::Stopped,
        _ => EndReason::Finished,
    }
}

#[async_trait]
impl AudioBackend for SongbirdBackend {
    async fn search(&self, query: &str) -> BackendResult<Vec<TrackRef>> {
        if is_playlist_url(query) {
            info!("Detected playlist in {query}");
            return tracks_from_playlist_url(query).await;
        }

        let input = if is_url(query) {
            ytdl(query).await
        } else {
            ytdl_search(query).await
        }
        .map_err(|why| load_error(query, why))?;

        Ok(track_from_input(&input).into_iter().collect())
    }

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> BackendResult<()> {
        let (call, result) = self.manager.join(guild_id, channel_id).await;
        result.map_err(|why| BackendError::Connection(why.to_string()))?;

        if self.self_deaf {
            let mut handler = call.lock().await;

            if handler.is_deaf() {
                debug!(guild_id = guild_id.0, "Already deafened");
            } else if let Err(why) = handler.deafen(true).await {
                info!(guild_id = guild_id.0, "Deafen failed due to {why:?}");
            }
        }

        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> BackendResult<()> {
        if let Some((_, active)) = self.tracks.remove(&guild_id) {
            active.superseded.mark(EndReason::Cleanup);
        }

        if self.manager.get(guild_id).is_none() {
            return Err(BackendError::NoConnection(guild_id.0));
        }

        self.manager
            .remove(guild_id)
            .await
            .map_err(|why| BackendError::Connection(why.to_string()))
    }

    async fn play(&self, guild_id: GuildId, track: &TrackRef) -> BackendResult<PlayId> {
        let call = self
            .manager
            .get(guild_id)
            .ok_or(BackendError::NoConnection(guild_id.0))?;

        let source = ytdl(&track.url).await.map_err(|why| load_error(&track.url, why))?;
        let play_id = PlayId(self.next_play_id.fetch_add(1, Ordering::Relaxed));
        let superseded = Arc::new(Superseded::default());

        let handle = {
            let mut handler = call.lock().await;

            if let Some((_, previous)) = self.tracks.remove(&guild_id) {
                debug!(guild_id = guild_id.0, "Replacing playback {}", previous.play_id);
                previous.superseded.mark(EndReason::Replaced);
            }

            // Just in case something was playing before
            handler.stop();
            handler.play_source(source)
        };

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    events: self.events.clone(),
                    guild_id,
                    play_id,
                    track: track.clone(),
                    superseded: superseded.clone(),
                },
            )
            .map_err(control_error)?;

        handle
            .add_event(
                Event::Periodic(self.stuck_threshold, None),
                StuckDetector {
                    events: self.events.clone(),
                    guild_id,
                    play_id,
                    track: track.clone(),
                    threshold: self.stuck_threshold,
                    last_position: AtomicU64::new(u64::MAX),
                    reported: AtomicBool::new(false),
                },
            )
            .map_err(control_error)?;

        self.tracks.insert(
            guild_id,
            ActiveTrack {
                handle,
                play_id,
                superseded,
            },
        );

        self.emit(guild_id, play_id, track, TrackEventKind::Started);

        Ok(play_id)
    }

    async fn pause(&self, guild_id: GuildId) -> BackendResult<()> {
        let active = self.tracks.get(&guild_id).ok_or(BackendError::NoTrack)?;
        active.handle.pause().map_err(control_error)
    }

    async fn resume(&self, guild_id: GuildId) -> BackendResult<()> {
        let active = self.tracks.get(&guild_id).ok_or(BackendError::NoTrack)?;
        active.handle.play().map_err(control_error)
    }

    async fn stop(&self, guild_id: GuildId, track: &TrackRef) -> BackendResult<()> {
        let (_, active) = self.tracks.remove(&guild_id).ok_or(BackendError::NoTrack)?;
        info!(guild_id = guild_id.0, "Stopping {} ({})", track.title, active.play_id);

        active.handle.stop().map_err(control_error)
    }
}

/// Forwards songbird's end-of-track event to the reconciler.
struct TrackEndNotifier {
    events: UnboundedSender<BackendEvent>,
    guild_id: GuildId,
    play_id: PlayId,
    track: TrackRef,
    superseded: Arc<Superseded>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let reason = if let Some(reason) = self.superseded.reason() {
            reason
        } else if let EventContext::Track(tracks) = ctx {
            tracks
                .first()
                .map(|(state, _)| end_reason(&state.playing))
                .unwrap_or(EndReason::Finished)
        } else {
            EndReason::Finished
        };

        debug!(guild_id = self.guild_id.0, "End notifier triggered for {} ({reason:?})", self.play_id);
        emit(&self.events, self.guild_id, self.play_id, &self.track, TrackEventKind::Ended(reason));

        None
    }
}

/// Reports a playing track whose position stops moving, once per playback.
struct StuckDetector {
    events: UnboundedSender<BackendEvent>,
    guild_id: GuildId,
    play_id: PlayId,
    track: TrackRef,
    threshold: Duration,
    last_position: AtomicU64,
    reported: AtomicBool,
}

#[async_trait]
impl VoiceEventHandler for StuckDetector {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };
        let Some((state, _)) = tracks.first() else {
            return None;
        };

        if !matches!(state.playing, PlayMode::Play) {
            self.last_position.store(u64::MAX, Ordering::Release);
            return None;
        }

        let position = u64::try_from(state.position.as_millis()).unwrap_or(u64::MAX - 1);
        let previous = self.last_position.swap(position, Ordering::AcqRel);

        if previous == position && !self.reported.swap(true, Ordering::AcqRel) {
            emit(
                &self.events,
                self.guild_id,
                self.play_id,
                &self.track,
                TrackEventKind::Stuck {
                    threshold: self.threshold,
                },
            );
        }

        None
    }
}
