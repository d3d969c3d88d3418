use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use loomerp_core::AggregateId;
use loomerp_shipping::{AssignCarrier, CreateShipment, Shipment, ShipmentCommand};

use crate::app::routes::{common, common::CmdAuth, lifecycle};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new().nest(
        "/shipments",
        lifecycle::collection::<Shipment>(post(create_shipment)).route("/:id/carrier", post(assign_carrier)),
    )
}

pub async fn create_shipment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateShipmentRequest>,
) -> Response {
    let tenant_id = tenant.tenant_id();
    let shipment_id = AggregateId::new();
    let cmd = ShipmentCommand::Create(CreateShipment {
        tenant_id,
        shipment_id,
        reference: body.reference,
        customer_code: body.customer_code,
        sales_order_ref: body.sales_order_ref,
        cartons: body.cartons,
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["shipping.shipments.create"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services.dispatcher().execute::<Shipment>(tenant_id, shipment_id, cmd, None) {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn assign_carrier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignCarrierRequest>,
) -> Response {
    let shipment_id = match common::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let cmd = ShipmentCommand::AssignCarrier(AssignCarrier {
        tenant_id: tenant.tenant_id(),
        shipment_id,
        carrier: body.carrier,
        tracking_number: body.tracking_number,
        assigned_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["shipping.shipments.edit"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .execute::<Shipment>(tenant.tenant_id(), shipment_id, cmd, None)
    {
        Ok(d) => lifecycle::updated(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
