use axum::{routing::get, Router};

pub mod common;
pub mod finance;
pub mod inventory;
pub mod lifecycle;
pub mod purchases;
pub mod shipping;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/notifications", get(system::notifications))
        .route("/lifecycles", get(system::lifecycles))
        .route("/lifecycles/:entity", get(system::lifecycle))
        .nest("/purchases", purchases::router())
        .nest("/finance", finance::router())
        .nest("/inventory", inventory::router())
        .nest("/shipping", shipping::router())
}
