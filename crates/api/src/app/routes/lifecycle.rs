//! Handlers shared by every lifecycle document collection.
//!
//! Each collection mounts `collection::<A>(create)`: list from the status board,
//! detail and history from the rehydrated aggregate, and the status transition
//! endpoint, which is the only way a document's status changes over HTTP.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use loomerp_core::{LifecycleAggregate, LifecycleStatus, TransitionRequest};
use loomerp_events::Event;
use loomerp_finance::{CreditNote, DebitNote};
use loomerp_inventory::{MaterialRequest, MaterialReturn};
use loomerp_purchasing::{GoodsReceiptNote, PurchaseOrder, VendorReturn};
use loomerp_shipping::Shipment;

use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

/// A lifecycle document exposed over HTTP.
pub trait Resource: LifecycleAggregate + Serialize {
    /// Grants list, detail, history and allowed-target reads.
    const READ_PERMISSION: &'static str;
}

impl Resource for PurchaseOrder {
    const READ_PERMISSION: &'static str = "purchases.read";
}

impl Resource for GoodsReceiptNote {
    const READ_PERMISSION: &'static str = "purchases.read";
}

impl Resource for VendorReturn {
    const READ_PERMISSION: &'static str = "purchases.read";
}

impl Resource for CreditNote {
    const READ_PERMISSION: &'static str = "finance.read";
}

impl Resource for DebitNote {
    const READ_PERMISSION: &'static str = "finance.read";
}

impl Resource for MaterialRequest {
    const READ_PERMISSION: &'static str = "inventory.read";
}

impl Resource for MaterialReturn {
    const READ_PERMISSION: &'static str = "inventory.read";
}

impl Resource for Shipment {
    const READ_PERMISSION: &'static str = "shipping.read";
}

/// Standard routes for one document collection, with its own create handler.
pub fn collection<A>(create: MethodRouter) -> Router
where
    A: Resource,
    A::Event: Event + Serialize + DeserializeOwned,
{
    Router::new()
        .route("/", create.get(list::<A>))
        .route("/:id", get(detail::<A>))
        .route("/:id/transitions", post(transition::<A>).get(allowed_targets::<A>))
        .route("/:id/history", get(history::<A>))
}

/// Load a document the caller may read, or the error response to return.
pub fn load<A>(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    raw_id: &str,
) -> Result<A, Response>
where
    A: Resource,
    A::Event: DeserializeOwned,
{
    common::require(tenant, principal, A::READ_PERMISSION)?;
    let id = common::parse_id(raw_id)?;
    services
        .dispatcher()
        .load_existing::<A>(tenant.tenant_id(), id)
        .map_err(errors::dispatch_error_to_response)
}

/// 201 with the freshly created document.
pub fn created<A: Resource>(aggregate: A, principal: &PrincipalContext) -> Response {
    (StatusCode::CREATED, Json(dto::DocumentResponse::new(aggregate, &principal.actor()))).into_response()
}

/// 200 with the document after a non-lifecycle command.
pub fn updated<A: Resource>(aggregate: A, principal: &PrincipalContext) -> Response {
    (StatusCode::OK, Json(dto::DocumentResponse::new(aggregate, &principal.actor()))).into_response()
}

/// Run a transition request as the caller and render the outcome.
pub fn run_transition<A>(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    id: loomerp_core::AggregateId,
    target: A::Status,
    body: Option<dto::TransitionRequestBody>,
) -> Response
where
    A: Resource,
    A::Event: Event + Serialize + DeserializeOwned,
{
    let actor = principal.actor();
    let mut request = TransitionRequest::new(target, actor.clone(), Utc::now());
    let mut expected_version = None;
    if let Some(body) = body {
        if let Some(reason) = body.reason {
            request = request.with_reason(reason);
        }
        if let Some(request_id) = body.request_id {
            request = request.with_request_id(request_id);
        }
        expected_version = body.expected_version;
    }

    match services
        .workflow()
        .apply_transition::<A>(tenant.tenant_id(), id, request, expected_version)
    {
        Ok(outcome) => (StatusCode::OK, Json(dto::TransitionResponse::new(&outcome, &actor))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list<A>(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListQuery>,
) -> Response
where
    A: Resource,
    A::Event: Event + Serialize + DeserializeOwned,
{
    if let Err(resp) = common::require(&tenant, &principal, A::READ_PERMISSION) {
        return resp;
    }
    // Unknown statuses are a client error, not an empty page.
    if let Some(status) = query.status.as_deref() {
        if let Err(e) = status.parse::<A::Status>() {
            return errors::domain_error_to_response(e);
        }
    }

    match services.list_documents(tenant.tenant_id(), A::aggregate_type(), query.status.as_deref()) {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::status_board_error_to_response(e),
    }
}

pub async fn detail<A>(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response
where
    A: Resource,
    A::Event: Event + Serialize + DeserializeOwned,
{
    match load::<A>(&services, &tenant, &principal, &id) {
        Ok(aggregate) => updated(aggregate, &principal),
        Err(resp) => resp,
    }
}

pub async fn transition<A>(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::TransitionRequestBody>,
) -> Response
where
    A: Resource,
    A::Event: Event + Serialize + DeserializeOwned,
{
    let id = match common::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let target = match body.target.parse::<A::Status>() {
        Ok(target) => target,
        Err(e) => return errors::domain_error_to_response(e),
    };

    run_transition::<A>(&services, &tenant, &principal, id, target, Some(body))
}

pub async fn allowed_targets<A>(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response
where
    A: Resource,
    A::Event: Event + Serialize + DeserializeOwned,
{
    let aggregate = match load::<A>(&services, &tenant, &principal, &id) {
        Ok(aggregate) => aggregate,
        Err(resp) => return resp,
    };
    let actor = principal.actor();
    let status = aggregate.status();
    let allowed = <A::Status as LifecycleStatus>::lifecycle().allowed_targets_for(status, &actor);

    Json(dto::AllowedTargetsResponse {
        id: *loomerp_core::AggregateRoot::id(&aggregate),
        status: status.as_str(),
        allowed_targets: allowed.iter().map(|s| s.as_str()).collect(),
    })
    .into_response()
}

pub async fn history<A>(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response
where
    A: Resource,
    A::Event: Event + Serialize + DeserializeOwned,
{
    match load::<A>(&services, &tenant, &principal, &id) {
        Ok(aggregate) => Json(dto::HistoryResponse::of(&aggregate)).into_response(),
        Err(resp) => resp,
    }
}
