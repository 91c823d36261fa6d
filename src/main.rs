mod bot;
mod config;
mod lifecycle;
mod platform;
mod server;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::BotSession;
use crate::config::Config;
use crate::lifecycle::{Lifecycle, Phase};
use crate::platform::telegram::{self, TelegramMessenger};
use crate::platform::EventHub;
use crate::server::RelayState;

#[tokio::main]
async fn main() {
    // Load .env before logging so RUST_LOG from the file applies
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,miniapp_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    lifecycle::install_panic_hook();
    let lifecycle = Arc::new(Lifecycle::new());

    // Run on a spawned task so a panic outside the HTTP layer still ends in `Crashed`
    let outcome = match dotenv {
        Ok(path) => {
            debug!("Loaded environment from {}", path.display());
            tokio::spawn(run(lifecycle.clone())).await
        }
        Err(e) if e.not_found() => {
            debug!("No .env file found, using process environment");
            tokio::spawn(run(lifecycle.clone())).await
        }
        Err(e) => Ok(Err(anyhow!(e).context("Failed to load .env file"))),
    };

    lifecycle.advance(outcome_phase(outcome));
    std::process::exit(lifecycle.phase().exit_code().unwrap_or(1));
}

/// Terminal phase for the outcome of the top-level task.
fn outcome_phase(outcome: Result<Result<()>, JoinError>) -> Phase {
    match outcome {
        Ok(Ok(())) => Phase::Stopped,
        Ok(Err(e)) => {
            error!("{:#}", e);
            Phase::Crashed
        }
        Err(e) => {
            error!("Uncaught panic in main task: {}", e);
            Phase::Crashed
        }
    }
}

/// Whichever top-level task completed first
enum Finished {
    Server(Result<Result<()>, JoinError>),
    Bot(Result<Result<()>, JoinError>),
}

async fn run(lifecycle: Arc<Lifecycle>) -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    let bot = telegram::connect(&config.bot_token).await?;
    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));
    let session = Arc::new(BotSession::new(messenger, config.frontend_url.clone()));

    let mut hub = EventHub::new();
    BotSession::register(&session, &mut hub);
    let hub = Arc::new(hub);

    let app = server::router(&config, RelayState::new(config.mode, Some(session)))?;
    let listener = server::bind(config.port).await?;

    lifecycle.advance(Phase::Listening);
    info!("Server is running on port {}", config.port);
    info!("  Frontend URL: {}", config.frontend_url);
    info!("  Environment: {}", config.mode);
    info!("  Allowed origins: {:?}", config.allowed_origins);

    let mut bot_task = tokio::spawn(telegram::run(bot, hub));
    let mut server_task = tokio::spawn(server::serve(
        listener,
        app,
        lifecycle::shutdown_signal(lifecycle.clone()),
    ));

    let first = tokio::select! {
        res = &mut server_task => Finished::Server(res),
        res = &mut bot_task => Finished::Bot(res),
    };

    let served = match first {
        Finished::Server(served) => served,
        Finished::Bot(Ok(Ok(()))) => {
            warn!("Telegram dispatcher stopped; HTTP server keeps running");
            server_task.await
        }
        Finished::Bot(Ok(Err(e))) => {
            server_task.abort();
            return Err(e.context("Telegram dispatcher failed"));
        }
        Finished::Bot(Err(e)) => {
            server_task.abort();
            return Err(anyhow!("Uncaught panic in Telegram dispatcher: {}", e));
        }
    };

    bot_task.abort();
    match served {
        Ok(Ok(())) => {
            info!("Server closed");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(anyhow!("Uncaught panic in HTTP server: {}", e)),
    }
}
