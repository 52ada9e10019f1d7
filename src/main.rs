//! Daemon entry point: parses CLI flags, layers an optional config file
//! on top, acquires the single-instance PID lock, opens the SQLite
//! store, and serves the loopback control surface until a shutdown
//! signal arrives. Mirrors the teacher's `main.rs` shape (clap
//! `CommandFactory`/`FromArgMatches`, a manually built multi-threaded
//! `tokio::runtime::Builder`) scoped to a daemon rather than a one-shot
//! CLI run.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use loadcore::args::DaemonArgs;
use loadcore::config::{self, DaemonConfig, RuntimeConfig};
use loadcore::control::{self, AppState};
use loadcore::coordinator::RunCoordinator;
use loadcore::persistence::Store;
use loadcore::pidlock::PidLock;
use loadcore::script::Sandbox;
use loadcore::shutdown::setup_signal_shutdown_handler;
use loadcore::transport::Transport;

fn main() -> Result<(), Box<dyn Error>> {
    let args = DaemonArgs::parse();
    loadcore::logger::init_logging(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(args))
}

async fn run(args: DaemonArgs) -> Result<(), Box<dyn Error>> {
    let config_path = args.config;
    let mut daemon_config =
        DaemonConfig { port: args.port, data_dir: args.data_dir.into(), verbose: args.verbose };
    let mut runtime_config = RuntimeConfig::default();

    if let Some(file) = config::load_config(config_path.as_deref())? {
        if let Some(port) = file.port {
            daemon_config.port = port;
        }
        if let Some(data_dir) = file.data_dir {
            daemon_config.data_dir = data_dir.into();
        }
        file.runtime.apply_to(&mut runtime_config);
    }

    std::fs::create_dir_all(&daemon_config.data_dir)?;
    let pid_lock = PidLock::acquire(&daemon_config.pid_path())?;
    tracing::info!(pid_file = %pid_lock.path().display(), "acquired pid lock");

    let store = Arc::new(Store::open(daemon_config.db_path()).await?);
    for entry in runtime_config.entries() {
        if let Some(value) = store.get_value(loadcore::persistence::Table::Config, &entry.key).await? {
            runtime_config.set(&entry.key, &value);
        }
    }

    let transport = Arc::new(Transport::new());
    let sandbox = Arc::new(Sandbox::new(
        runtime_config.context_pool_size,
        500,
        64 * 1024 * 1024,
        4 * 1024 * 1024,
    )?);
    let coordinator = Arc::new(RunCoordinator::new(store.clone(), transport, sandbox));
    let state = AppState::new(coordinator.clone(), store, runtime_config);

    let router = control::build_router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", daemon_config.port)).await?;
    tracing::info!(port = daemon_config.port, "loadcore control surface listening");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);
    let mut shutdown_rx = shutdown_tx.subscribe();

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            drop(shutdown_rx.recv().await);
        })
        .await?;

    coordinator.shutdown_all().await;
    drop(signal_handle);
    drop(pid_lock);
    Ok(())
}
