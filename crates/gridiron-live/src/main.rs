// Live simulation client entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout is the scoreboard)
// 2. Load config and derive endpoints
// 3. Create the store and subscribe the scoreboard printer
// 4. Start the live session
// 5. Print updates until Ctrl+C
// 6. Shut the session down (bounded wait)

use std::sync::Arc;
use std::time::Duration;

use gridiron_core::config;
use gridiron_core::connection::{
    ConnectionState, LiveSession, SessionConfig, SessionEvent, TungsteniteConnector,
};
use gridiron_core::game::{GameStore, StoreChange};
use gridiron_core::resync::ResyncClient;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Upper bound on how long shutdown may take before the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Gridiron live client starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    let endpoints = config.endpoints().context("invalid server configuration")?;
    info!(
        "Config loaded: stream={}, status={}",
        endpoints.stream_url, endpoints.status_url
    );
    let session_config =
        SessionConfig::from_config(&config).context("invalid session configuration")?;

    // 3. Store with a scoreboard printer. Subscribers run inside the session
    // task, so lines are forwarded here for printing.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let mut store = GameStore::new();
    store.subscribe(move |change, view| {
        let line = match change {
            StoreChange::GameUpdated => view.game.to_string(),
            StoreChange::PlayAdded => match view.play_log.front() {
                Some(play) => format!(
                    "PLAY: {} ({:+} yds){}",
                    play.description,
                    play.yards_gained,
                    if play.is_touchdown { " TOUCHDOWN" } else { "" }
                ),
                None => return,
            },
            StoreChange::SecondaryUpdated { bucket } => match view.secondary.get(bucket) {
                Some(data) => format!(
                    "[{bucket}] {}",
                    serde_json::to_string(data).unwrap_or_default()
                ),
                None => return,
            },
            StoreChange::Reset => "-- new game --".to_string(),
        };
        let _ = line_tx.send(line);
    });

    // 4. Start the session
    let (session, mut events) = LiveSession::start(
        store,
        Arc::new(TungsteniteConnector),
        Arc::new(ResyncClient::new(endpoints.status_url)),
        session_config,
    );

    // 5. Print until Ctrl+C
    loop {
        tokio::select! {
            Some(line) = line_rx.recv() => println!("{line}"),
            Some(event) = events.recv() => match event {
                SessionEvent::Connection(state) => {
                    println!("[connection] {}", describe(state));
                    if state == ConnectionState::Closed {
                        break;
                    }
                }
                SessionEvent::ResyncRequested => println!("[connection] resyncing..."),
                SessionEvent::ReconnectScheduled { attempt, delay } => {
                    println!("[connection] retry #{attempt} in {:.1}s", delay.as_secs_f64());
                }
                SessionEvent::Animating(true) => println!("[field] play in progress..."),
                SessionEvent::Animating(false) => println!("[field] ready"),
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {e}");
                }
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // 6. Cleanup
    match tokio::time::timeout(SHUTDOWN_GRACE, session.shutdown()).await {
        Ok(Some(store)) => info!(
            "Session closed with {} plays logged; final: {}",
            store.play_count(),
            store.game()
        ),
        Ok(None) => warn!("Session task did not return its store"),
        Err(_) => warn!("Shutdown timed out"),
    }

    info!("Gridiron live client shut down cleanly");
    Ok(())
}

fn describe(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "idle",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Open => "live",
        ConnectionState::Reconnecting => "reconnecting",
        ConnectionState::Closed => "closed",
    }
}

/// Initialize tracing to log to a file (stdout carries the scoreboard).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("gridiron-live.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gridiron_core=info,gridiron_live=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
