use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{sse::Event as SseEvent, IntoResponse, Response, Sse},
    Json,
};
use tokio_stream::Stream;

use loomerp_infra::catalog;
use loomerp_infra::reactors::Department;

use crate::app::services::{self, AppServices};
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "tenant_id": tenant.tenant_id().to_string(),
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "permissions": loomerp_auth::policy::grants_for(principal.roles()),
    }))
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::tenant_sse_stream(&services, tenant.tenant_id())
}

pub async fn lifecycles() -> impl IntoResponse {
    Json(catalog::lifecycles())
}

/// Static transition table for one document type, e.g. `purchasing.grn`.
pub async fn lifecycle(Path(entity): Path<String>) -> Response {
    match catalog::lifecycle(&entity) {
        Some(table) => Json(table).into_response(),
        None => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no lifecycle for '{entity}'"),
        ),
    }
}

/// Department notifications for the caller's tenant, newest first.
pub async fn notifications(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::NotificationQuery>,
) -> Response {
    let department = match query.department.as_deref() {
        None => None,
        Some(raw) => match Department::parse(raw) {
            Some(d) => Some(d),
            None => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("unknown department '{raw}'"),
                )
            }
        },
    };

    Json(services.notifications(tenant.tenant_id(), department)).into_response()
}
