//! Leaves voice channels that no human is listening in anymore.
//!
//! When the bot's channel empties, a deferred disconnect is armed for the
//! guild. Anyone coming back before it fires cancels it; when it fires the
//! occupancy is checked again before leaving. At most one timer exists per
//! guild: arming replaces, it never stacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serenity::cache::Cache;
use serenity::model::guild::Guild;
use serenity::model::id::{ChannelId, GuildId};
use serenity::model::voice::VoiceState;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

use crate::messages;
use crate::orchestrator::Orchestrator;

/// Read access to who is sitting in which voice channel.
pub trait VoiceRoster: Send + Sync {
    /// The channel the bot is connected to in this guild, if any.
    fn bot_channel(&self, guild_id: GuildId) -> Option<ChannelId>;

    /// Non-bot users currently in `channel_id`.
    fn human_occupants(&self, guild_id: GuildId, channel_id: ChannelId) -> usize;
}

/// Reads voice occupancy from the gateway cache.
pub struct CacheRoster {
    cache: Arc<Cache>,
}

impl CacheRoster {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

fn is_bot(guild: &Guild, state: &VoiceState) -> bool {
    state
        .member
        .as_ref()
        .map(|member| member.user.bot)
        .or_else(|| guild.members.get(&state.user_id).map(|member| member.user.bot))
        .unwrap_or(false)
}

impl VoiceRoster for CacheRoster {
    fn bot_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let bot_id = self.cache.current_user_id();
        let guild = self.cache.guild(guild_id)?;

        guild.voice_states.get(&bot_id).and_then(|state| state.channel_id)
    }

    fn human_occupants(&self, guild_id: GuildId, channel_id: ChannelId) -> usize {
        let bot_id = self.cache.current_user_id();
        let Some(guild) = self.cache.guild(guild_id) else {
            return 0;
        };

        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id) && state.user_id != bot_id)
            .filter(|state| !is_bot(&guild, state))
            .count()
    }
}

/// A user's voice state changed somewhere in a guild.
#[derive(Clone, Copy, Debug)]
pub struct VoiceStateChange {
    pub guild_id: GuildId,
    pub user_is_bot: bool,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorAction {
    /// The change did not touch the bot's channel.
    Ignored,
    /// Listeners remain and nothing was pending.
    Occupied,
    /// Listeners came back; the pending disconnect was cancelled.
    Cancelled,
    /// The channel emptied; a disconnect is now pending.
    Armed,
    /// The channel is still empty and a disconnect was already pending.
    AlreadyArmed,
}

struct DisconnectTimer {
    id: u64,
    token: CancellationToken,
}

pub struct IdleDisconnectSupervisor {
    orchestrator: Arc<Orchestrator>,
    roster: Arc<dyn VoiceRoster>,
    delay: Duration,
    timers: DashMap<GuildId, DisconnectTimer>,
    next_timer_id: AtomicU64,
}

impl IdleDisconnectSupervisor {
    pub fn new(orchestrator: Arc<Orchestrator>, roster: Arc<dyn VoiceRoster>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            roster,
            delay,
            timers: DashMap::new(),
            next_timer_id: AtomicU64::new(1),
        })
    }

    pub fn on_voice_state_change(self: &Arc<Self>, change: VoiceStateChange) -> SupervisorAction {
        let guild_id = change.guild_id;

        if change.user_is_bot {
            return SupervisorAction::Ignored;
        }

        let Some(bot_channel) = self.roster.bot_channel(guild_id) else {
            return SupervisorAction::Ignored;
        };

        if change.old_channel != Some(bot_channel) && change.new_channel != Some(bot_channel) {
            return SupervisorAction::Ignored;
        }

        let humans = self.roster.human_occupants(guild_id, bot_channel);
        debug!(guild_id = guild_id.0, humans, "Voice channel membership changed");

        if humans > 0 {
            return if self.cancel(guild_id) {
                SupervisorAction::Cancelled
            } else {
                SupervisorAction::Occupied
            };
        }

        if self.is_armed(guild_id) {
            return SupervisorAction::AlreadyArmed;
        }

        // Two empty-channel events racing past the check both arm; the later one replaces.
        self.arm(guild_id);

        SupervisorAction::Armed
    }

    /// Arms a disconnect for the guild, cancelling any one already pending.
    fn arm(self: &Arc<Self>, guild_id: GuildId) {
        let timer = self.new_timer();
        let (id, token) = (timer.id, timer.token.clone());

        if let Some(previous) = self.timers.insert(guild_id, timer) {
            previous.token.cancel();
        }

        self.spawn_timer(guild_id, id, token);
    }

    /// Cancels the guild's pending disconnect. Returns false if none was pending.
    pub fn cancel(&self, guild_id: GuildId) -> bool {
        match self.timers.remove(&guild_id) {
            Some((_, timer)) => {
                timer.token.cancel();
                info!(guild_id = guild_id.0, "Disconnect timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, guild_id: GuildId) -> bool {
        self.timers.contains_key(&guild_id)
    }

    fn new_timer(&self) -> DisconnectTimer {
        DisconnectTimer {
            id: self.next_timer_id.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }

    fn spawn_timer(self: &Arc<Self>, guild_id: GuildId, id: u64, token: CancellationToken) {
        info!(guild_id = guild_id.0, "Voice channel is empty, leaving in {}s", self.delay.as_secs());
        let supervisor = self.clone();

        tokio::spawn(
            async move { supervisor.run_timer(guild_id, id, token).await }
                .instrument(info_span!("idle_disconnect", guild_id = guild_id.0)),
        );
    }

    async fn run_timer(self: Arc<Self>, guild_id: GuildId, id: u64, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(self.delay) => {}
        }

        // Past this point cancellation no longer preempts; the re-check decides.
        self.fire(guild_id).await;
        self.timers.remove_if(&guild_id, |_, timer| timer.id == id);
    }

    async fn fire(&self, guild_id: GuildId) -> bool {
        let Some(channel_id) = self.roster.bot_channel(guild_id) else {
            debug!(guild_id = guild_id.0, "Bot already left voice");
            return false;
        };

        let humans = self.roster.human_occupants(guild_id, channel_id);
        if humans > 0 {
            info!(guild_id = guild_id.0, humans, "Listeners are back, staying");
            return false;
        }

        self.orchestrator
            .notify(guild_id, messages::LEFT_VOICE_CHANNEL)
            .await;

        if let Err(why) = self.orchestrator.leave(guild_id).await {
            warn!(guild_id = guild_id.0, "Idle disconnect failed: {why}");
        }

        true
    }
}
