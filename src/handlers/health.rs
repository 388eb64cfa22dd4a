use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::cache::CacheStats;
use crate::AppState;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Records the process start for the uptime figure. Call once at startup.
pub fn init_start_time() {
    STARTED.get_or_init(Instant::now);
}

fn uptime_secs() -> u64 {
    STARTED.get().map_or(0, |started| started.elapsed().as_secs())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Up,
    Down,
}

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct StoreCheck {
    pub status: StoreStatus,
    pub message: String,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct CacheCheck {
    pub listings: CacheStats,
    pub details: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub store: StoreCheck,
    pub cache: CacheCheck,
    pub checked_at: String,
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness))
        .route("/ready", get(readiness))
}

async fn liveness() -> Json<Liveness> {
    Json(Liveness {
        status: "up",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime_secs(),
    })
}

/// Ready when the product store answers a listing read.
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let started = Instant::now();
    let check = state.catalog.check_store().await;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let store = match check {
        Ok(()) => StoreCheck {
            status: StoreStatus::Up,
            message: "Store reachable".to_string(),
            latency_ms,
        },
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            StoreCheck {
                status: StoreStatus::Down,
                message: err.response_message(),
                latency_ms,
            }
        }
    };

    let ready = store.status == StoreStatus::Up;
    let body = Readiness {
        status: if ready { "ready" } else { "not_ready" },
        store,
        cache: CacheCheck {
            listings: state.catalog.listings().stats(),
            details: state.catalog.details().stats(),
        },
        checked_at: chrono::Utc::now().to_rfc3339(),
    };

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
