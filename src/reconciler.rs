//! Applies backend track events to guild sessions.
//!
//! All backend events arrive on one channel. A dispatcher fans them out to one
//! worker per guild, so a guild's events are handled strictly one after the
//! other while different guilds proceed in parallel. A worker lives as long as
//! its guild has a session and retires on the first event that finds none.

use std::sync::Arc;

use dashmap::DashMap;
use serenity::model::id::GuildId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::backend::{BackendEvent, TrackEventKind};
use crate::error::{PlaybackError, PlaybackResult};
use crate::messages;
use crate::models::TrackRef;
use crate::orchestrator::Orchestrator;
use crate::session::GuildSession;

pub struct EventReconciler {
    orchestrator: Arc<Orchestrator>,
    workers: DashMap<GuildId, UnboundedSender<BackendEvent>>,
}

impl EventReconciler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            workers: DashMap::new(),
        })
    }

    /// Consumes the backend's event stream until every sender is dropped.
    pub fn spawn(self: &Arc<Self>, mut events: UnboundedReceiver<BackendEvent>) -> JoinHandle<()> {
        let reconciler = self.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                reconciler.dispatch(event);
            }

            info!("Backend event stream closed");
        })
    }

    fn dispatch(self: &Arc<Self>, event: BackendEvent) {
        let guild_id = event.guild_id;

        let worker = self
            .workers
            .entry(guild_id)
            .or_insert_with(|| self.spawn_worker(guild_id))
            .value()
            .clone();

        if let Err(mpsc::error::SendError(event)) = worker.send(event) {
            // The worker retired between lookup and send.
            let replacement = self.spawn_worker(guild_id);
            self.workers.insert(guild_id, replacement.clone());

            if replacement.send(event).is_err() {
                warn!(guild_id = guild_id.0, "Fresh event worker refused an event");
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, guild_id: GuildId) -> UnboundedSender<BackendEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let reconciler = self.clone();
        let own_sender = sender.clone();

        tokio::spawn(
            async move { reconciler.run_worker(guild_id, own_sender, receiver).await }
                .instrument(info_span!("guild_events", guild_id = guild_id.0)),
        );

        sender
    }

    async fn run_worker(
        self: Arc<Self>,
        guild_id: GuildId,
        own_sender: UnboundedSender<BackendEvent>,
        mut events: UnboundedReceiver<BackendEvent>,
    ) {
        debug!("Event worker started");

        while let Some(event) = events.recv().await {
            if let Err(PlaybackError::SessionMissing) = self.handle_logged(event).await {
                self.workers
                    .remove_if(&guild_id, |_, sender| sender.same_channel(&own_sender));
                events.close();

                // Anything already buffered still gets handled.
                while let Some(event) = events.recv().await {
                    let _ = self.handle_logged(event).await;
                }

                break;
            }
        }

        debug!("Event worker retired");
    }

    async fn handle_logged(&self, event: BackendEvent) -> PlaybackResult<()> {
        let guild_id = event.guild_id;
        let result = self.handle(event).await;

        match &result {
            Err(why) if why.is_benign() => debug!(guild_id = guild_id.0, "Event for a guild without session"),
            Err(why) => warn!(guild_id = guild_id.0, "Event handling failed: {why}"),
            Ok(()) => {}
        }

        result
    }

    /// Applies one event to its guild's session.
    ///
    /// A guild without a session yields [`PlaybackError::SessionMissing`], which is not a fault.
    pub async fn handle(&self, event: BackendEvent) -> PlaybackResult<()> {
        let guild_id = event.guild_id;
        let session = self
            .orchestrator
            .session(guild_id)
            .ok_or(PlaybackError::SessionMissing)?;
        let mut session = session.lock().await;
        let is_current = session.is_current(event.play_id);

        match event.kind {
            TrackEventKind::Started => {
                if is_current {
                    self.orchestrator
                        .notify(guild_id, &messages::now_playing(&event.track))
                        .await;
                } else {
                    debug!(guild_id = guild_id.0, "Start of stale playback {}", event.play_id);
                }
            }
            TrackEventKind::Ended(reason) => {
                if !reason.may_start_next() {
                    debug!(guild_id = guild_id.0, "Playback {} ended by {reason:?}, nothing to do", event.play_id);
                } else if !is_current {
                    debug!(guild_id = guild_id.0, "End of stale playback {}", event.play_id);
                } else {
                    self.finish(&mut session, &event.track).await;
                }
            }
            TrackEventKind::Stuck { threshold } => {
                self.orchestrator
                    .notify(guild_id, &messages::track_stuck(&event.track, threshold))
                    .await;

                if is_current {
                    self.abandon(&mut session).await;
                    self.finish(&mut session, &event.track).await;
                }
            }
            TrackEventKind::Exception { message } => {
                self.orchestrator
                    .notify(guild_id, &messages::track_exception(&event.track, &message))
                    .await;

                if is_current {
                    self.abandon(&mut session).await;
                    self.finish(&mut session, &event.track).await;
                }
            }
        }

        Ok(())
    }

    /// Stops a broken playback at the backend so nothing keeps playing behind an idle session.
    async fn abandon(&self, session: &mut GuildSession) {
        let guild_id = session.guild_id;
        let Some(now) = session.clear_current() else {
            return;
        };

        if let Err(why) = self.orchestrator.backend().stop(guild_id, &now.track).await {
            warn!(guild_id = guild_id.0, "Backend stop of {} ({}) failed: {why}", now.track.title, now.play_id);
        }
    }

    /// Moves a session on from a track that is done: replay it when looping, otherwise advance.
    async fn finish(&self, session: &mut GuildSession, track: &TrackRef) {
        let guild_id = session.guild_id;

        if self.orchestrator.is_loop(guild_id) {
            match self.replay(session, track).await {
                Ok(()) => return,
                Err(why) => warn!(guild_id = guild_id.0, "Loop replay of {} failed: {why}", track.title),
            }
        }

        if self.orchestrator.start_next(session).await.is_none() {
            info!(guild_id = guild_id.0, "Queue finished, session is idle");
        }
    }

    /// Re-resolves the track's source and starts it again in place of the ended playback.
    async fn replay(&self, session: &mut GuildSession, track: &TrackRef) -> PlaybackResult<()> {
        let fresh = self
            .orchestrator
            .backend()
            .search(&track.url)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PlaybackError::TrackNotFound(track.url.clone()))?;

        self.orchestrator.start(session, fresh).await
    }
}
