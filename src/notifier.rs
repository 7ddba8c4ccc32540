use std::sync::Arc;

use dashmap::DashMap;
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, GuildId};
use serenity::Result as SerenityResult;
use tracing::{debug, info};

/// Where status text ends up. Failures are the sink's problem to log.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, channel_id: ChannelId, text: &str);
}

/// Posts to a text channel through the serenity HTTP client.
pub struct ChannelSink {
    http: Arc<Http>,
}

impl ChannelSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, channel_id: ChannelId, text: &str) {
        check_msg(channel_id.say(&self.http, text).await);
    }
}

/// Routes guild status text to the text channel bound on join.
pub struct Notifier {
    bindings: DashMap<GuildId, ChannelId>,
    sink: Arc<dyn MessageSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            bindings: DashMap::new(),
            sink,
        }
    }

    /// Binds the guild's notification channel unless one is already bound.
    pub fn bind(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.bindings.entry(guild_id).or_insert(channel_id);
    }

    pub fn unbind(&self, guild_id: GuildId) {
        self.bindings.remove(&guild_id);
    }

    pub fn binding(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.bindings.get(&guild_id).map(|entry| *entry.value())
    }

    /// Fire-and-forget. Silently dropped when the guild has no binding.
    pub async fn notify(&self, guild_id: GuildId, text: &str) {
        info!(guild_id = guild_id.0, "{text}");

        match self.binding(guild_id) {
            Some(channel_id) => self.sink.send(channel_id, text).await,
            None => debug!(guild_id = guild_id.0, "No text channel bound, dropping notification"),
        }
    }
}

/// Checks that a message successfully sent; if not, then logs why.
pub fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}
