//! eq - runs the coordinator of one equiplet until SIGINT/SIGTERM

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use blackboard::{Blackboard, FeedStore, JsonlFeed, Matcher, spawn_tailer};
use equiplet::cli::Cli;
use equiplet::config::Config;
use equiplet::coordinator::{Coordinator, CoordinatorHandle};
use equiplet::events::log_events;
use equiplet::instructions::InstructionBridge;
use equiplet::ipc;
use equiplet::supervisor::ShellSupervisor;
use equiplet::transport::SocketTransport;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("equiplet")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("equiplet.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let equiplet_id = cli.resolve_equiplet_id();

    run(equiplet_id, config).await
}

async fn run(equiplet_id: u32, config: Config) -> Result<()> {
    info!(%equiplet_id, "Equiplet starting");

    let supervisor = Arc::new(ShellSupervisor::new(config.supervisor.clone()));
    let transport = Arc::new(SocketTransport::new(
        config.ipc.socket_dir.clone(),
        config.coordinator.request_timeout(),
    ));
    let (handle, coord_task) = Coordinator::spawn(equiplet_id, config.coordinator.clone(), supervisor, transport);
    let events_task = tokio::spawn(log_events(handle.subscribe_events()));

    // Module-facing socket
    let socket_path = ipc::coordinator_socket_path(&config.ipc.socket_dir, equiplet_id);
    let (listener, socket_path) = ipc::create_listener_at(&socket_path)?;
    info!(?socket_path, "IPC socket listening");
    let (ipc_shutdown_tx, ipc_shutdown_rx) = mpsc::channel::<()>(1);
    let ipc_task = tokio::spawn(ipc::serve(listener, handle.clone(), ipc_shutdown_rx));

    // Instruction feed
    let mut feed_shutdown = Vec::new();
    let mut feed_tasks = Vec::new();
    if config.blackboard.enabled {
        let feed = Arc::new(JsonlFeed::open(&config.blackboard.feed_path).context("Failed to open instruction feed")?);
        let store: Arc<dyn FeedStore> = feed;
        info!(feed = %config.blackboard.feed_path.display(), collection = %config.blackboard.collection, "Instruction feed enabled");

        let matcher = Matcher::new();
        let bridge = InstructionBridge::new(handle.clone(), Blackboard::new(store.clone()), &config.blackboard.collection);
        let rx = bridge.subscribe(&matcher);

        let (bridge_tx, bridge_rx) = mpsc::channel::<()>(1);
        let (tail_tx, tail_rx) = mpsc::channel::<()>(1);
        feed_tasks.push(tokio::spawn(bridge.run(rx, bridge_rx)));
        let tailer = spawn_tailer(store, matcher, config.blackboard.tail.clone(), tail_rx);
        feed_tasks.push(tokio::spawn(async move {
            if let Ok(cursor) = tailer.await {
                debug!(cursor, "run: tailer finished");
            }
        }));
        feed_shutdown.push(bridge_tx);
        feed_shutdown.push(tail_tx);
    } else {
        info!("Instruction feed disabled");
    }

    info!(%equiplet_id, "Equiplet running. Press Ctrl+C to stop.");
    wait_for_signal().await?;

    info!("Equiplet shutting down...");
    for tx in &feed_shutdown {
        let _ = tx.send(()).await;
    }
    for task in feed_tasks {
        let _ = task.await;
    }
    let _ = ipc_shutdown_tx.send(()).await;
    let _ = ipc_task.await;
    ipc::cleanup_socket(&socket_path);

    stop_modules(&handle).await;
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Coordinator already stopped");
    }
    let _ = coord_task.await;
    drop(handle);
    events_task.abort();

    debug!("run: shutdown complete");
    Ok(())
}

/// Deregister every module still attached so its process is stopped
async fn stop_modules(handle: &CoordinatorHandle) {
    let modules = match handle.get_all_modules().await {
        Ok(modules) => modules,
        Err(e) => {
            warn!(error = %e, "Could not list modules at shutdown");
            return;
        }
    };
    for module in modules {
        if let Err(e) = handle.deregister_module(module.id).await {
            warn!(module_id = module.id, error = %e, "Failed to deregister module at shutdown");
        }
    }
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}
