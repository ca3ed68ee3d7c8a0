//! livewall — live video wallpaper host for X11
//!
//! Creates a full-screen, override-redirect, desktop-classified window,
//! launches an external player (mpv) rendering into it, and adjusts the
//! player's volume from Up/Down key events over its JSON IPC socket.

mod command;
mod config;
mod display;
mod error;
mod events;
mod ipc;
mod player;
mod window;

use anyhow::Result;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use command::{normalize, vf_filters, PlayerKind};
use config::Config;
use display::DisplaySession;
use error::Error;
use events::{EventLoop, LoopOutcome};
use ipc::ControlChannel;
use player::Player;
use window::HostWindow;

/// How long the single-instance probe waits for a live socket
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "livewall=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut template: Vec<String> = std::env::args().skip(1).collect();
    if template.is_empty() {
        error!("{}", Error::EmptyCommand);
        eprintln!("Usage: livewall COMMAND [ARGS...]   e.g. livewall mpv video.mp4");
        std::process::exit(1);
    }

    let config = Config::load()?;

    // Folder mode expands in place before anything else looks at the args
    let media = command::resolve_media(&mut template)?;

    // A live instance on the fixed socket gets the new video instead of a
    // second window and player.
    let probe_path = template
        .iter()
        .find_map(|a| a.strip_prefix("--input-ipc-server="))
        .map(std::path::PathBuf::from)
        .unwrap_or_else(command::control_socket_path);

    if ControlChannel::probe(&probe_path, PROBE_TIMEOUT).await.is_some() {
        info!("Existing instance detected; loading {}", media);
        replace_running_video(&probe_path, &media, &template).await;
        return Ok(());
    }

    match run(template, media, config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Tell the running instance to swap videos: clear old filters, replace the
/// file, re-apply only the filters from this invocation.
async fn replace_running_video(path: &std::path::Path, media: &str, template: &[String]) {
    ipc::send_oneshot(path, &[json!("vf"), json!("clear")]).await;
    ipc::send_oneshot(path, &[json!("loadfile"), json!(media), json!("replace")]).await;
    for filter in vf_filters(template) {
        ipc::send_oneshot(path, &[json!("vf"), json!("set"), json!(filter)]).await;
    }
}

/// Full startup: window, player, channel, event loop. Returns the process
/// exit code.
async fn run(template: Vec<String>, media: String, config: Config) -> Result<i32> {
    info!("Starting livewall for {}", media);

    // Shutdown plumbing before anything that needs cleanup exists
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    {
        use anyhow::Context;
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            }
            let _ = shutdown_tx.send(()).await;
        });
    }

    let session = DisplaySession::connect()?;
    let host = HostWindow::create(&session)?;

    let kind = PlayerKind::detect(&template[0]);
    let cmd = normalize(&template, &host.hex_id(), kind)?;

    let mut player = Player::launch(&cmd)?;

    // The player creates its socket asynchronously; only dial when the final
    // argument vector actually declares one.
    let declared = cmd
        .argv
        .iter()
        .any(|a| a.starts_with("--input-ipc-server="));
    let channel = if declared {
        match ControlChannel::connect(
            &cmd.socket,
            config.channel.connect_attempts,
            Duration::from_millis(config.channel.connect_backoff_ms),
            Duration::from_millis(config.channel.send_timeout_ms),
        )
        .await
        {
            Ok(channel) => Some(channel),
            Err(e) if !e.is_fatal() => {
                // Wallpaper keeps playing, volume keys go dead
                warn!("{e}; volume control disabled");
                None
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        info!("Player declares no IPC socket; volume control disabled");
        None
    };

    let mut event_loop = EventLoop::new(session.conn.clone(), channel, &config)?;

    let outcome = match event_loop.run(&mut player, &mut shutdown_rx).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Display died mid-run: stop, take the player down, report
            player.terminate().await;
            player.wait().await;
            return Err(e.into());
        }
    };

    match outcome {
        LoopOutcome::PlayerExited(code) => {
            info!("Exited cleanly.");
            Ok(code)
        }
        LoopOutcome::Interrupted => {
            // Loop stopped first, then the player; the channel closes with
            // the event loop.
            player.terminate().await;
            player.wait().await;
            info!("Exited cleanly.");
            Ok(0)
        }
    }
}
