use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use stateset_catalog as catalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = catalog::config::load_config().context("loading configuration")?;
    catalog::config::init_tracing(&cfg.log_level, cfg.log_json);
    catalog::handlers::health::init_start_time();

    let addr = cfg.socket_addr()?;
    let state = catalog::build_state(cfg)
        .await
        .context("connecting the product store")?;

    if let Err(err) = state.catalog.check_store().await {
        error!(error = %err, "product store is not answering; serving anyway");
    }

    let app = catalog::build_router(state);

    info!("stateset-catalog listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
