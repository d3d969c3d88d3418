//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: event store, bus, dispatcher and the post-commit pipeline worker
//! - `routes/`: HTTP routes + handlers (one file per domain area, plus the shared
//!   lifecycle handlers every document collection mounts)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use loomerp_infra::config::{AppConfig, StoreBackend};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

const TEST_REALTIME_CAPACITY: usize = 256;

/// Router over in-memory stores, as used by tests and local runs.
pub async fn build_app(jwt_secret: String) -> anyhow::Result<Router> {
    let services = services::build_services(&StoreBackend::InMemory, TEST_REALTIME_CAPACITY).await?;
    Ok(router_with(jwt_secret, services))
}

/// Router for a process configuration (public entrypoint used by `main.rs`).
pub async fn build_app_with(config: &AppConfig) -> anyhow::Result<Router> {
    let services = services::build_services(&config.store, config.realtime_channel_capacity).await?;
    Ok(router_with(config.jwt_secret.clone(), services))
}

fn router_with(jwt_secret: String, services: services::AppServices) -> Router {
    let jwt = Arc::new(loomerp_auth::Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require auth + tenant context.
    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(Extension(Arc::new(services)))
            .layer(axum::middleware::from_fn_with_state(auth_state, middleware::auth_middleware)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
