use std::sync::Arc;

use serenity::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::model::gateway::Ready;
use serenity::model::voice::VoiceState;
use tracing::{debug, info};

use crate::orchestrator::Orchestrator;
use crate::supervisor::{IdleDisconnectSupervisor, VoiceStateChange};
use crate::{OrchestratorKey, SupervisorKey};

pub struct Handler;

async fn services(ctx: &Context) -> Option<(Arc<Orchestrator>, Arc<IdleDisconnectSupervisor>)> {
    let data = ctx.data.read().await;

    Some((data.get::<OrchestratorKey>()?.clone(), data.get::<SupervisorKey>()?.clone()))
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let Some((orchestrator, supervisor)) = services(&ctx).await else {
            debug!("Voice state update before initialisation");
            return;
        };

        if new.user_id == ctx.cache.current_user_id() {
            if new.channel_id.is_none() {
                info!(guild_id = guild_id.0, "Bot was disconnected from voice");
                supervisor.cancel(guild_id);
                orchestrator.forget(guild_id).await;
            }
            return;
        }

        let user_is_bot = new
            .member
            .as_ref()
            .map(|member| member.user.bot)
            .or_else(|| ctx.cache.user(new.user_id).map(|user| user.bot))
            .unwrap_or(false);

        let change = VoiceStateChange {
            guild_id,
            user_is_bot,
            old_channel: old.and_then(|state| state.channel_id),
            new_channel: new.channel_id,
        };

        let action = supervisor.on_voice_state_change(change);
        debug!(guild_id = guild_id.0, "Voice state change handled: {action:?}");
    }
}
