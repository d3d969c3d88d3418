use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use loomerp_core::AggregateId;
use loomerp_infra::command_dispatcher::DispatchError;
use loomerp_purchasing::{
    AddLine, CreateGrn, CreatePurchaseOrder, CreateVendorReturn, ExpectedLine, GoodsReceiptNote, GrnCommand,
    NewOrderLine, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderLine, PurchaseOrderStatus, RecordReceivedQuantity, ReturnSource, VendorReturn,
    VendorReturnCommand,
};

use crate::app::routes::{common, common::CmdAuth, lifecycle};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .nest("/orders", orders_router())
        .nest("/grns", grns_router())
        .nest("/vendor-returns", lifecycle::collection::<VendorReturn>(post(create_vendor_return)))
}

fn orders_router() -> Router {
    lifecycle::collection::<PurchaseOrder>(post(create_purchase_order))
        .route("/:id/lines", post(add_purchase_order_line))
}

fn grns_router() -> Router {
    lifecycle::collection::<GoodsReceiptNote>(post(create_grn))
        .route("/:id/lines/:line_no", post(record_received_quantity))
        .route("/:id/inspect", post(inspect_grn))
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreatePurchaseOrderRequest>,
) -> Response {
    let tenant_id = tenant.tenant_id();
    let order_id = AggregateId::new();

    let mut required = vec!["purchases.orders.create"];
    if !body.lines.is_empty() {
        required.push("purchases.orders.edit");
    }
    let cmd = PurchaseOrderCommand::Create(CreatePurchaseOrder {
        tenant_id,
        order_id,
        reference: body.reference,
        vendor_code: body.vendor_code,
        lines: body
            .lines
            .into_iter()
            .map(|l| NewOrderLine {
                material_code: l.material_code,
                quantity: l.quantity,
                unit_price: l.unit_price,
            })
            .collect(),
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &required).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services.dispatcher().execute::<PurchaseOrder>(tenant_id, order_id, cmd, None) {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn add_purchase_order_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PurchaseOrderLineRequest>,
) -> Response {
    let order_id = match common::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let cmd = PurchaseOrderCommand::AddLine(AddLine {
        tenant_id: tenant.tenant_id(),
        order_id,
        material_code: body.material_code,
        quantity: body.quantity,
        unit_price: body.unit_price,
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["purchases.orders.edit"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .execute::<PurchaseOrder>(tenant.tenant_id(), order_id, cmd, None)
    {
        Ok(d) => lifecycle::updated(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Creates a GRN against a purchase order that has been sent to the vendor. Without
/// explicit lines the GRN expects every outstanding order line.
pub async fn create_grn(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateGrnRequest>,
) -> Response {
    if let Err(resp) = common::require(&tenant, &principal, "purchases.grn.create") {
        return resp;
    }
    let tenant_id = tenant.tenant_id();
    let order_id = match common::parse_id(&body.purchase_order_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let order = match services.dispatcher().load_existing::<PurchaseOrder>(tenant_id, order_id) {
        Ok(order) => order,
        Err(DispatchError::NotFound) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "unknown purchase_order_id")
        }
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if !matches!(
        order.status(),
        PurchaseOrderStatus::Sent | PurchaseOrderStatus::PartiallyReceived
    ) {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            format!("goods cannot be received on a purchase order in status '{}'", order.status()),
        );
    }

    let lines = match body.lines {
        Some(requested) => match expected_lines(&order, &requested) {
            Ok(lines) => lines,
            Err(message) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        },
        None => order
            .lines()
            .iter()
            .filter(|l| l.outstanding() > 0)
            .map(|l| expected_line(l, l.outstanding()))
            .collect(),
    };

    let grn_id = AggregateId::new();
    let cmd = GrnCommand::Create(CreateGrn {
        tenant_id,
        grn_id,
        reference: body.reference,
        purchase_order_id: order_id,
        vendor_code: order.vendor_code().to_string(),
        lines,
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });

    match services.dispatcher().execute::<GoodsReceiptNote>(tenant_id, grn_id, cmd, None) {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

fn expected_line(line: &PurchaseOrderLine, ordered: u32) -> ExpectedLine {
    ExpectedLine {
        po_line_no: line.line_no,
        material_code: line.material_code.clone(),
        ordered,
        unit_price: line.unit_price,
    }
}

/// Resolves requested GRN lines against the order. Material and price always come from
/// the order line; the request only picks lines and quantities.
fn expected_lines(order: &PurchaseOrder, requested: &[dto::GrnLineRequest]) -> Result<Vec<ExpectedLine>, String> {
    let mut seen = BTreeSet::new();
    requested
        .iter()
        .map(|req| {
            let line = order
                .line(req.po_line_no)
                .ok_or_else(|| format!("purchase order has no line {}", req.po_line_no))?;
            if !seen.insert(req.po_line_no) {
                return Err(format!("line {} is listed more than once", req.po_line_no));
            }
            if req.ordered > line.outstanding() {
                return Err(format!(
                    "line {}: expected {} exceeds outstanding {}",
                    req.po_line_no,
                    req.ordered,
                    line.outstanding()
                ));
            }
            Ok(expected_line(line, req.ordered))
        })
        .collect()
}

pub async fn record_received_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, line_no)): Path<(String, u32)>,
    Json(body): Json<dto::RecordReceivedQuantityRequest>,
) -> Response {
    let grn_id = match common::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let cmd = GrnCommand::RecordReceivedQuantity(RecordReceivedQuantity {
        tenant_id: tenant.tenant_id(),
        grn_id,
        line_no,
        received: body.received,
        rejected: body.rejected,
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["purchases.grn.record"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .execute::<GoodsReceiptNote>(tenant.tenant_id(), grn_id, cmd, None)
    {
        Ok(d) => lifecycle::updated(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Moves a submitted GRN to the outcome its recorded quantities call for.
pub async fn inspect_grn(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    let grn = match lifecycle::load::<GoodsReceiptNote>(&services, &tenant, &principal, &id) {
        Ok(grn) => grn,
        Err(resp) => return resp,
    };
    let outcome = grn.inspection_outcome();

    lifecycle::run_transition::<GoodsReceiptNote>(
        &services,
        &tenant,
        &principal,
        *loomerp_core::AggregateRoot::id(&grn),
        outcome,
        None,
    )
}

pub async fn create_vendor_return(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateVendorReturnRequest>,
) -> Response {
    let tenant_id = tenant.tenant_id();
    let return_id = AggregateId::new();
    let cmd = VendorReturnCommand::Create(CreateVendorReturn {
        tenant_id,
        return_id,
        reference: body.reference,
        vendor_code: body.vendor_code,
        source: ReturnSource::Manual,
        lines: body.lines,
        note: body.note,
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["purchases.returns.create"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services.dispatcher().execute::<VendorReturn>(tenant_id, return_id, cmd, None) {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
