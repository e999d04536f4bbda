mod bootstrap;
mod health;
mod services;

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tutorbot_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use tutorbot_core::config::LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the loaded config, so config errors surface on stderr via anyhow.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let bootstrap::Application { config, governor, runtime, conversation_log, sweeper, chat_runner } =
        app;
    let transport_mode = chat_runner.transport_name();

    health::spawn(
        &config.server.bind_address,
        config.server.health_check_port,
        health::HealthState::new(governor, runtime.provider(), transport_mode)
            .with_conversation_log(conversation_log),
    )
    .await?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        transport_mode,
        provider = runtime.provider(),
        "tutorbot-server started"
    );

    // The console transport ends with stdin; other transports run until a signal.
    let stop_when_chat_ends = transport_mode == "console";
    let mut chat = tokio::spawn(async move { chat_runner.start().await });
    tokio::select! {
        joined = &mut chat, if stop_when_chat_ends => {
            match joined {
                Ok(Ok(())) => info!(
                    event_name = "system.server.chat_closed",
                    correlation_id = "shutdown",
                    "chat transport closed"
                ),
                Ok(Err(error)) => warn!(
                    event_name = "system.server.chat_closed",
                    correlation_id = "shutdown",
                    error = %format!("{error:#}"),
                    "chat runner stopped with an error"
                ),
                Err(error) => warn!(
                    event_name = "system.server.chat_closed",
                    correlation_id = "shutdown",
                    error = %error,
                    "chat runner task panicked"
                ),
            }
        }
        signal = wait_for_shutdown() => signal?,
    }

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "tutorbot-server stopping"
    );
    chat.abort();
    let grace = Duration::from_secs(config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, sweeper.stop()).await.is_err() {
        warn!(
            event_name = "system.server.sweeper_stop_timeout",
            correlation_id = "shutdown",
            grace_secs = config.server.graceful_shutdown_secs,
            "governor sweeper did not stop within the grace period"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
