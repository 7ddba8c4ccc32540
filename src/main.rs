use std::error::Error;
use std::sync::Arc;

use dotenvy::dotenv;
use serenity::client::Client;
use serenity::framework::StandardFramework;
use serenity::prelude::{GatewayIntents, TypeMapKey};
use songbird::{SerenityInit, Songbird};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::voice::SongbirdBackend;
use crate::commands::GENERAL_GROUP;
use crate::config::Config;
use crate::handler::Handler;
use crate::notifier::ChannelSink;
use crate::orchestrator::Orchestrator;
use crate::reconciler::EventReconciler;
use crate::supervisor::{CacheRoster, IdleDisconnectSupervisor};

mod backend;
mod commands;
mod config;
mod error;
mod handler;
mod messages;
mod models;
mod notifier;
mod orchestrator;
mod playlists;
mod reconciler;
mod registry;
mod session;
mod supervisor;
#[cfg(test)]
mod testing;

pub struct OrchestratorKey;

impl TypeMapKey for OrchestratorKey {
    type Value = Arc<Orchestrator>;
}

pub struct SupervisorKey;

impl TypeMapKey for SupervisorKey {
    type Value = Arc<IdleDisconnectSupervisor>;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    if let Err(why) = dotenv() {
        eprintln!("No .env file loaded: {why}");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let framework = StandardFramework::new()
        .configure(|c| c.prefix(&config.prefix))
        .after(commands::after)
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let songbird = Songbird::serenity();

    let mut client = Client::builder(&config.token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(songbird.clone())
        .await?;

    let http = client.cache_and_http.http.clone();
    let cache = client.cache_and_http.cache.clone();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let backend = Arc::new(SongbirdBackend::new(
        songbird,
        events_tx,
        config.stuck_threshold,
        config.self_deaf,
    ));
    let orchestrator = Arc::new(Orchestrator::new(backend, Arc::new(ChannelSink::new(http))));
    let reconciler = EventReconciler::new(orchestrator.clone());
    reconciler.spawn(events_rx);

    let supervisor = IdleDisconnectSupervisor::new(
        orchestrator.clone(),
        Arc::new(CacheRoster::new(cache)),
        config.idle_disconnect,
    );

    {
        let mut data = client.data.write().await;
        data.insert::<OrchestratorKey>(orchestrator);
        data.insert::<SupervisorKey>(supervisor);
    }

    info!(prefix = %config.prefix, "Starting client");

    tokio::spawn(async move {
        if let Err(why) = client.start().await {
            warn!("Client ended: {why:?}");
        }
    });

    tokio::signal::ctrl_c().await?;

    info!("Received Ctrl-C, shutting down.");

    Ok(())
}
