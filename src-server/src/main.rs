//! Airwave daemon entry point

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use airwave_core::{
    AirwaveSettings, AnalyserConfig, AudioBackend, AudioGraphManager, AutoplayPolicy, Catalog,
    CpalBackend, HttpMediaFactory, HttpResolver, OfflineBackend, PlaybackController,
    StreamSession,
};
use airwave_server_lib::{router, AppState, Args, BackendKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("airwave=debug,tower=info")),
        )
        .init();

    let args = Args::parse();
    args.validate().map_err(|e| anyhow!(e))?;
    info!("Starting Airwave daemon");

    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;

    // A daemon has no user gestures; control requests stand in for them
    let backend: Arc<dyn AudioBackend> = match args.backend {
        BackendKind::Cpal => Arc::new(CpalBackend::new(AutoplayPolicy::Allowed)),
        BackendKind::Offline => Arc::new(OfflineBackend::new(AutoplayPolicy::Allowed)),
    };
    let graph = Arc::new(AudioGraphManager::new(backend, args.graph_config()));

    let resolver_config = args.resolver_config();
    let resolver = HttpResolver::new(resolver_config.clone()).context("building resolver")?;
    let media = HttpMediaFactory::new(&resolver_config).context("building media client")?;
    let session = StreamSession::new(
        Arc::clone(&graph),
        Arc::new(resolver),
        Arc::new(media),
        args.session_config(),
        AnalyserConfig::default(),
    );

    let settings_path = if args.no_persist {
        None
    } else {
        args.settings.clone().or_else(AirwaveSettings::config_path)
    };
    let settings = match settings_path.as_deref() {
        Some(path) => AirwaveSettings::load_from(path),
        None => AirwaveSettings::default(),
    };
    settings.apply(&graph, &session);

    let player = PlaybackController::new(Arc::clone(&graph), session);
    let state = AppState::new(
        catalog,
        player,
        settings,
        settings_path,
        &resolver_config.user_agent,
    )
    .context("building HTTP clients")?;

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!("Listening on http://{}", args.listen);

    if args.resume_last {
        state.resume_last_station().await;
    }

    let signal_state = state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
        signal_state.begin_shutdown();
    });

    let closing = state.closing.clone();
    let serve = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(closing.clone().cancelled_owned())
        .into_future();
    let grace = args.shutdown_grace();
    tokio::select! {
        served = serve => served.context("serving HTTP")?,
        _ = async {
            closing.cancelled().await;
            tokio::time::sleep(grace).await;
        } => warn!("Connections still open after {:?}; stopping anyway", grace),
    }

    state.shutdown().await;
    info!("Airwave stopped");
    Ok(())
}
