use std::sync::Arc;

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::Mutex;

use crate::session::GuildSession;

pub type SessionHandle = Arc<Mutex<GuildSession>>;

/// Guild id to live session, plus the per-guild loop flags.
///
/// Both maps are sharded, so guilds never contend with each other. A session's
/// own lock serializes queue and playback mutations for that guild only.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    loops: DashMap<GuildId, bool>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        // Clone the handle out so no shard guard is held across an await.
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    /// Returns the guild's session, creating it on first use. Second value is true when created.
    pub fn get_or_create(&self, guild_id: GuildId, voice_channel: ChannelId) -> (SessionHandle, bool) {
        let mut created = false;

        let handle = self
            .sessions
            .entry(guild_id)
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(GuildSession::new(guild_id, voice_channel)))
            })
            .value()
            .clone();

        (handle, created)
    }

    /// Drops the session and its loop flag.
    pub fn remove(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.loops.remove(&guild_id);
        self.sessions.remove(&guild_id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_loop(&self, guild_id: GuildId) -> bool {
        self.loops.get(&guild_id).is_some_and(|flag| *flag)
    }

    /// Flips the loop flag and returns the new value. Unset counts as off.
    pub fn toggle_loop(&self, guild_id: GuildId) -> bool {
        let mut flag = self.loops.entry(guild_id).or_insert(false);
        *flag = !*flag;
        *flag
    }
}
