use std::fmt::Display;
use std::sync::Arc;

use serenity::client::Context;
use serenity::framework::standard::macros::{command, group, hook};
use serenity::framework::standard::{Args, CommandError, CommandResult};
use serenity::model::channel::Message;
use serenity::model::channel::ReactionType::Unicode;
use serenity::model::guild::Guild;
use serenity::model::id::{ChannelId, GuildId};
use tracing::{info, warn};

use crate::error::PlaybackError;
use crate::messages;
use crate::notifier::check_msg;
use crate::orchestrator::{Orchestrator, PlayOutcome};
use crate::supervisor::IdleDisconnectSupervisor;
use crate::{OrchestratorKey, SupervisorKey};

#[group]
#[commands(join, leave, play, pause, resume, stop, skip, loop_track, queue, clear, remove, shuffle, help)]
pub struct General;

#[hook]
pub async fn after(_ctx: &Context, msg: &Message, command_name: &str, result: CommandResult) {
    if let Err(why) = result {
        warn!(guild_id = msg.guild_id.map(|id| id.0), "Command '{command_name}' failed: {why:?}");
    }
}

#[command]
#[only_in(guilds)]
#[aliases(j)]
async fn join(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    let Some(voice_channel) = author_voice_channel(ctx, msg) else {
        report(ctx, msg, &PlaybackError::UserNotInVoice).await;
        return Ok(());
    };

    match orchestrator.join(guild_id, voice_channel, msg.channel_id).await {
        Ok(()) => {
            let name = voice_channel
                .name(ctx)
                .await
                .unwrap_or_else(|| voice_channel.0.to_string());
            say(ctx, msg, messages::joined(&name)).await;
        }
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(l)]
async fn leave(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    if let Some(supervisor) = get_supervisor(ctx).await {
        supervisor.cancel(guild_id);
    }

    match orchestrator.leave(guild_id).await {
        Ok(()) => say(ctx, msg, messages::LEFT_VOICE_CHANNEL).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(p)]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let query = args.message().trim();

    if query.is_empty() {
        say(ctx, msg, messages::INVALID_SEARCH).await;
        return Ok(());
    }

    let loading_emoji = Unicode("⏳".to_string());
    msg.react(&ctx.http, loading_emoji.clone()).await?;

    let played = play_query(ctx, msg, query).await;

    let bot_id = ctx.cache.current_user_id();
    msg.channel_id
        .delete_reaction(&ctx.http, msg.id, Some(bot_id), loading_emoji)
        .await?;

    let answer_emoji = match played {
        Ok(()) => "👍",
        Err(_) => "💀",
    };
    msg.react(&ctx.http, Unicode(answer_emoji.to_string())).await?;

    Ok(())
}

async fn play_query(ctx: &Context, msg: &Message, query: &str) -> Result<(), PlaybackError> {
    let guild_id = get_guild_id(ctx, msg).map_err(|_| PlaybackError::NotConnected)?;
    let orchestrator = get_orchestrator(ctx).await.map_err(|_| PlaybackError::NotConnected)?;
    let voice_channel = author_voice_channel(ctx, msg);

    info!(guild_id = guild_id.0, "Play requested by {}", msg.author.name);

    match orchestrator
        .play_or_queue(guild_id, query, voice_channel, msg.channel_id)
        .await
    {
        Ok(PlayOutcome::Started { queued, .. }) => {
            if queued > 0 {
                say(ctx, msg, messages::queued_total(queued)).await;
            }
            Ok(())
        }
        Ok(PlayOutcome::Queued { first, count }) => {
            if count == 1 {
                say(ctx, msg, messages::added_to_queue(&first)).await;
            } else {
                say(ctx, msg, messages::queued_total(count)).await;
            }
            Ok(())
        }
        Err(why) => {
            report(ctx, msg, &why).await;
            Err(why)
        }
    }
}

#[command]
#[only_in(guilds)]
#[aliases(pa)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    match orchestrator.pause(guild_id).await {
        Ok(track) => say(ctx, msg, messages::paused(&track)).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(r, unpause)]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    match orchestrator.resume(guild_id).await {
        Ok(_) => say(ctx, msg, messages::TRACK_RESUMED).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(st)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    match orchestrator.stop(guild_id).await {
        Ok(Some(_)) => say(ctx, msg, messages::TRACK_STOPPED).await,
        Ok(None) => say(ctx, msg, messages::TRACK_EMPTY).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(s, next)]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    // The now-playing message for the new track comes from the track start event.
    match orchestrator.skip(guild_id).await {
        Ok(Some(_)) => msg.react(&ctx.http, Unicode("👍".to_string())).await.map(|_| ())?,
        Ok(None) => say(ctx, msg, messages::QUEUE_EMPTY).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command("loop")]
#[only_in(guilds)]
async fn loop_track(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    match orchestrator.toggle_loop(guild_id) {
        Ok(true) => say(ctx, msg, messages::LOOP_ENABLED).await,
        Ok(false) => say(ctx, msg, messages::LOOP_DISABLED).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(q)]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    if let Some((track, _)) = orchestrator.now_playing(guild_id).await {
        say(ctx, msg, messages::now_playing(&track)).await;
    }

    let tracks = orchestrator.list_queue(guild_id).await;
    if tracks.is_empty() {
        say(ctx, msg, messages::QUEUE_EMPTY).await;
        return Ok(());
    }

    for page in messages::queue_pages(&tracks) {
        say(ctx, msg, page).await;
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(c)]
async fn clear(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    match orchestrator.clear_queue(guild_id).await {
        0 => say(ctx, msg, messages::QUEUE_EMPTY).await,
        _ => say(ctx, msg, messages::QUEUE_CLEARED).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(rm)]
async fn remove(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    let Ok(index) = args.single::<usize>() else {
        say(ctx, msg, messages::INVALID_NUMBER).await;
        return Ok(());
    };

    match orchestrator.remove_from_queue(guild_id, index).await {
        Ok(track) => say(ctx, msg, messages::removed(&track)).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases(sh)]
async fn shuffle(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let orchestrator = get_orchestrator(ctx).await?;

    match orchestrator.shuffle_queue(guild_id).await {
        Ok(outcome) if outcome.shuffled == 0 => say(ctx, msg, messages::QUEUE_EMPTY).await,
        Ok(_) => say(ctx, msg, messages::QUEUE_SHUFFLED).await,
        Err(why) => report(ctx, msg, &why).await,
    }

    Ok(())
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    say(ctx, msg, messages::HELP).await;

    Ok(())
}

async fn say(ctx: &Context, msg: &Message, text: impl Display) {
    check_msg(msg.channel_id.say(&ctx.http, text).await);
}

async fn report(ctx: &Context, msg: &Message, why: &PlaybackError) {
    info!(guild_id = msg.guild_id.map(|id| id.0), "Command rejected: {why}");

    check_msg(msg.reply(ctx, why).await);
}

fn get_guild(ctx: &Context, msg: &Message) -> CommandResult<Guild> {
    msg.guild(&ctx.cache).ok_or(CommandError::from("Guild not found"))
}

fn get_guild_id(ctx: &Context, msg: &Message) -> CommandResult<GuildId> {
    match msg.guild_id {
        Some(guild_id) => Ok(guild_id),
        None => Ok(get_guild(ctx, msg)?.id),
    }
}

fn author_voice_channel(ctx: &Context, msg: &Message) -> Option<ChannelId> {
    get_guild(ctx, msg)
        .ok()?
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id)
}

async fn get_orchestrator(ctx: &Context) -> CommandResult<Arc<Orchestrator>> {
    let data = ctx.data.read().await;

    data.get::<OrchestratorKey>()
        .cloned()
        .ok_or(CommandError::from("Orchestrator placed in at initialisation."))
}

async fn get_supervisor(ctx: &Context) -> Option<Arc<IdleDisconnectSupervisor>> {
    let data = ctx.data.read().await;

    data.get::<SupervisorKey>().cloned()
}
