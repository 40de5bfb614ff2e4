use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runloop_core::{
    config::LogFormat, create_probe, create_renderer, create_source, load_config,
    validate_config, BatchController, Collaborators, DetachedLauncher, FinalizedRunStore,
    InstanceLock, SqliteFinalizedRunStore,
};
use runloop_server::{api::create_router, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("RUNLOOP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::default());
            return Err(e).with_context(|| format!("Failed to load config from {:?}", config_path));
        }
    };

    // Initialize logging
    init_tracing(config.log_format);
    info!("Loaded configuration from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;

    // Single writer per state directory
    let _lock = InstanceLock::acquire(&config.state.lock_path)
        .context("Another instance holds the state lock")?;
    info!("Holding instance lock {:?}", config.state.lock_path);

    let finalized: Arc<dyn FinalizedRunStore> = Arc::new(
        SqliteFinalizedRunStore::new(&config.state.path)
            .context("Failed to open finalized run store")?,
    );
    info!("Finalized run store at {:?}", config.state.path);

    let probe = create_probe(&config.probe).context("Failed to create run probe")?;
    let source = create_source(&config.source).context("Failed to create fragment source")?;
    let renderer = create_renderer(config.controller.flavor, &config.dispatch);
    info!(
        probe = probe.name(),
        source = source.name(),
        flavor = %config.controller.flavor,
        "Collaborators initialized"
    );

    let controller = BatchController::new(
        config.controller.clone(),
        config.toolchain.parameters_path.clone(),
        config.layout.clone(),
        Collaborators {
            probe: Arc::from(probe),
            source: Arc::from(source),
            renderer: Arc::from(renderer),
            launcher: Arc::new(DetachedLauncher::new(config.dispatch.shell.clone())),
            finalized: Arc::clone(&finalized),
        },
    );
    let status_rx = controller.subscribe();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut controller_handle = tokio::spawn(controller.run(shutdown_tx.subscribe()));

    // Operational HTTP endpoint
    let server_handle = if config.server.enabled {
        let state = Arc::new(AppState::new(config.clone(), status_rx, Arc::clone(&finalized)));
        let app = create_router(state);
        let addr = SocketAddr::new(config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Serving health and metrics on {}", addr);

        let mut server_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.recv().await;
                })
                .await
        }))
    } else {
        info!("HTTP endpoint disabled in config");
        None
    };

    // Run until a signal arrives or the controller stops on its own
    let finished = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut controller_handle => Some(result),
    };
    let _ = shutdown_tx.send(());
    let outcome = match finished {
        Some(result) => result,
        None => {
            info!("Shutting down...");
            controller_handle.await
        }
    };

    if let Some(handle) = server_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("HTTP endpoint error: {}", e),
            Err(e) => warn!("HTTP endpoint task failed: {}", e),
        }
    }

    outcome
        .context("Controller task panicked")?
        .context("Controller stopped")?;
    info!("Controller stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
