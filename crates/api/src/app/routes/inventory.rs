use std::sync::Arc;

use axum::{extract::Extension, response::Response, routing::post, Json, Router};
use chrono::Utc;

use loomerp_core::AggregateId;
use loomerp_inventory::{
    CreateMaterialRequest, CreateMaterialReturn, MaterialRequest, MaterialRequestCommand, MaterialReturn,
    MaterialReturnCommand,
};

use crate::app::routes::{common, common::CmdAuth, lifecycle};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .nest(
            "/material-requests",
            lifecycle::collection::<MaterialRequest>(post(create_material_request)),
        )
        .nest(
            "/material-returns",
            lifecycle::collection::<MaterialReturn>(post(create_material_return)),
        )
}

pub async fn create_material_request(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateMaterialRequestRequest>,
) -> Response {
    let tenant_id = tenant.tenant_id();
    let request_id = AggregateId::new();
    let cmd = MaterialRequestCommand::Create(CreateMaterialRequest {
        tenant_id,
        request_id,
        reference: body.reference,
        department: body.department,
        production_order_ref: body.production_order_ref,
        lines: body.lines,
        requested_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["inventory.material_requests.create"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .execute::<MaterialRequest>(tenant_id, request_id, cmd, None)
    {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_material_return(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateMaterialReturnRequest>,
) -> Response {
    let material_request_id = match common::parse_optional_id(body.material_request_id.as_deref()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let tenant_id = tenant.tenant_id();
    let return_id = AggregateId::new();
    let cmd = MaterialReturnCommand::Create(CreateMaterialReturn {
        tenant_id,
        return_id,
        reference: body.reference,
        department: body.department,
        material_request_id,
        lines: body.lines,
        reason: body.reason,
        submitted_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["inventory.material_returns.create"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .execute::<MaterialReturn>(tenant_id, return_id, cmd, None)
    {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
