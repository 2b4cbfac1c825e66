use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hostwatch::config::{Config, LogConfig};
use hostwatch::monitor::{Monitor, MonitorShared};
use hostwatch::sampler::{HostProbe, Sampler, SysinfoProbe};
use hostwatch::{server, sink, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration & logging ───────────────────────────────
    let (config, path) = Config::load().context("loading configuration")?;
    init_logging(&config.log)?;
    match &path {
        Some(p) => info!(path = %p.display(), "configuration loaded"),
        None => info!("no configuration file; using defaults"),
    }

    // ── 2. Shared state ──────────────────────────────────────────
    let host = config.host();
    let shared = Arc::new(MonitorShared::new(
        config.history_capacity,
        config.thresholds,
        config.settings(),
        host.clone(),
    ));

    // ── 3. Sink & sampler ────────────────────────────────────────
    let sink = sink::from_config(&config.sink).context("building metrics sink")?;
    let probe: Arc<dyn HostProbe> = Arc::new(SysinfoProbe::new());
    let sampler = Sampler::new(probe.clone(), config.cpu_window());

    // ── 4. Monitor loop ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Monitor::new(
        sampler,
        sink,
        shared.clone(),
        config.backoff(),
        config.sink_timeout(),
    );
    let loop_handle = tokio::spawn(monitor.run(shutdown_rx.clone()));

    info!(
        %host,
        interval_secs = config.interval_secs.secs(),
        interfaces = ?config.interfaces,
        sink = ?config.sink.kind,
        "monitor started"
    );

    // ── 5. Query surface ─────────────────────────────────────────
    let app = server::create_router(Arc::new(AppState {
        monitor: shared,
        probe,
    }));
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(addr = %config.server.bind, "query API listening");

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("query API exited with error")?;

    // ── 6. Drain the loop ────────────────────────────────────────
    if let Err(e) = loop_handle.await {
        warn!(error = %e, "monitor task ended abnormally");
    }
    info!("bye");
    Ok(())
}

fn init_logging(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("hostwatch=info,tower_http=warn"))?;

    if log.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()?;
    }
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
