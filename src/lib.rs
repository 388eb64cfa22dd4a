//! StateSet product catalog
//!
//! Browsing, filtering, searching and editing products held in a document
//! or relational store, with a keyed query cache between the screens and
//! the store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod cache;
pub mod config;
pub mod entities;
pub mod errors;
pub mod filters;
pub mod forms;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod repositories;
pub mod search;
pub mod services;
pub mod views;

use axum::{http::HeaderValue, Router};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::notifications::Notifier;
use crate::services::ProductCatalog;

// App state definition
#[derive(Clone, Debug)]
pub struct AppState {
    pub catalog: ProductCatalog,
    pub notifier: Notifier,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(catalog: ProductCatalog, config: AppConfig) -> Self {
        Self {
            notifier: Notifier::new(&config.notifications),
            catalog,
            config: Arc::new(config),
        }
    }
}

/// Connects the configured store and wires the catalog around it.
pub async fn build_state(config: AppConfig) -> Result<AppState, ServiceError> {
    let repository =
        repositories::connect(&config.store_url, config.store_max_connections).await?;
    let catalog = ProductCatalog::new(repository, &config.cache);
    Ok(AppState::new(catalog, config))
}

/// Builds the HTTP router: `/api/v1/*` plus `/health`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/products", handlers::products::products_routes())
        .merge(handlers::products::catalog_routes());

    Router::new()
        .nest("/api/v1", api)
        .nest("/health", handlers::health::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .into_iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}
