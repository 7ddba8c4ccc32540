//! Test doubles for the backend, the message sink and the voice roster.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::Notify;

use crate::backend::{AudioBackend, BackendError, BackendResult};
use crate::models::{PlayId, TrackRef};
use crate::notifier::MessageSink;
use crate::supervisor::VoiceRoster;

pub fn track(title: &str) -> TrackRef {
    TrackRef::new(title, format!("https://example.com/{title}"), None)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    Search(String),
    Join(GuildId, ChannelId),
    Leave(GuildId),
    Play(GuildId, String),
    Pause(GuildId),
    Resume(GuildId),
    Stop(GuildId, String),
}

/// Records every call. Searches answer from scripted results; plays hand out increasing ids.
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<BackendCall>>,
    results: Mutex<HashMap<String, Vec<TrackRef>>>,
    failing_searches: Mutex<HashSet<String>>,
    failing_plays: Mutex<HashSet<String>>,
    search_gate: Mutex<Option<Arc<Notify>>>,
    last_play_id: AtomicU64,
}

impl MockBackend {
    pub fn add_results(&self, query: &str, tracks: Vec<TrackRef>) {
        self.results.lock().unwrap().insert(query.to_string(), tracks);
    }

    pub fn fail_search(&self, query: &str) {
        self.failing_searches.lock().unwrap().insert(query.to_string());
    }

    pub fn fail_play(&self, url: &str) {
        self.failing_plays.lock().unwrap().insert(url.to_string());
    }

    /// Makes every later search wait until the returned gate is notified.
    pub fn gate_searches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.search_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| predicate(call)).count()
    }

    /// URLs of every successful play, in order.
    pub fn plays(&self) -> Vec<String> {
        let failing = self.failing_plays.lock().unwrap();

        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Play(_, url) if !failing.contains(&url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AudioBackend for MockBackend {
    async fn search(&self, query: &str) -> BackendResult<Vec<TrackRef>> {
        self.record(BackendCall::Search(query.to_string()));

        let gate = self.search_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failing_searches.lock().unwrap().contains(query) {
            return Err(BackendError::Load {
                input: query.to_string(),
                reason: "search failed".to_string(),
            });
        }

        Ok(self.results.lock().unwrap().get(query).cloned().unwrap_or_default())
    }

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> BackendResult<()> {
        self.record(BackendCall::Join(guild_id, channel_id));
        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> BackendResult<()> {
        self.record(BackendCall::Leave(guild_id));
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, track: &TrackRef) -> BackendResult<PlayId> {
        self.record(BackendCall::Play(guild_id, track.url.clone()));

        if self.failing_plays.lock().unwrap().contains(&track.url) {
            return Err(BackendError::Load {
                input: track.url.clone(),
                reason: "unavailable video".to_string(),
            });
        }

        Ok(PlayId(self.last_play_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn pause(&self, guild_id: GuildId) -> BackendResult<()> {
        self.record(BackendCall::Pause(guild_id));
        Ok(())
    }

    async fn resume(&self, guild_id: GuildId) -> BackendResult<()> {
        self.record(BackendCall::Resume(guild_id));
        Ok(())
    }

    async fn stop(&self, guild_id: GuildId, track: &TrackRef) -> BackendResult<()> {
        self.record(BackendCall::Stop(guild_id, track.url.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(ChannelId, String)>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<(ChannelId, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, channel_id: ChannelId, text: &str) {
        self.messages.lock().unwrap().push((channel_id, text.to_string()));
    }
}

/// Voice occupancy the tests can change between supervisor calls.
#[derive(Default)]
pub struct FakeRoster {
    bot_channel: Mutex<Option<ChannelId>>,
    humans: AtomicUsize,
}

impl FakeRoster {
    pub fn in_channel(channel_id: ChannelId, humans: usize) -> Self {
        Self {
            bot_channel: Mutex::new(Some(channel_id)),
            humans: AtomicUsize::new(humans),
        }
    }

    pub fn set_humans(&self, humans: usize) {
        self.humans.store(humans, Ordering::SeqCst);
    }

    pub fn set_bot_channel(&self, channel_id: Option<ChannelId>) {
        *self.bot_channel.lock().unwrap() = channel_id;
    }
}

impl VoiceRoster for FakeRoster {
    fn bot_channel(&self, _guild_id: GuildId) -> Option<ChannelId> {
        *self.bot_channel.lock().unwrap()
    }

    fn human_occupants(&self, _guild_id: GuildId, _channel_id: ChannelId) -> usize {
        self.humans.load(Ordering::SeqCst)
    }
}
