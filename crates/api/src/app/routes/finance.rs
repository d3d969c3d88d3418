use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use loomerp_core::AggregateId;
use loomerp_finance::{
    CreateCreditNote, CreateDebitNote, CreditNote, CreditNoteCommand, DebitNote, DebitNoteCommand, RecordSettlement,
};

use crate::app::routes::{common, common::CmdAuth, lifecycle};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .nest(
            "/credit-notes",
            lifecycle::collection::<CreditNote>(post(create_credit_note))
                .route("/:id/settlements", post(record_settlement)),
        )
        .nest("/debit-notes", lifecycle::collection::<DebitNote>(post(create_debit_note)))
}

pub async fn create_credit_note(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateCreditNoteRequest>,
) -> Response {
    let vendor_return_id = match common::parse_optional_id(body.vendor_return_id.as_deref()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let tenant_id = tenant.tenant_id();
    let note_id = AggregateId::new();
    let cmd = CreditNoteCommand::Create(CreateCreditNote {
        tenant_id,
        note_id,
        reference: body.reference,
        vendor_code: body.vendor_code,
        vendor_return_id,
        amount: body.amount,
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["finance.credit_notes.create"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services.dispatcher().execute::<CreditNote>(tenant_id, note_id, cmd, None) {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Records a payment against an accepted credit note. The note settles once the
/// full amount has been received.
pub async fn record_settlement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SettlementRequest>,
) -> Response {
    let note_id = match common::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let cmd = CreditNoteCommand::RecordSettlement(RecordSettlement {
        tenant_id: tenant.tenant_id(),
        note_id,
        amount: body.amount,
        actor: principal.actor(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["finance.credit_notes.settle"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .execute::<CreditNote>(tenant.tenant_id(), note_id, cmd, None)
    {
        Ok(d) => lifecycle::updated(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_debit_note(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateDebitNoteRequest>,
) -> Response {
    let grn_id = match common::parse_optional_id(body.grn_id.as_deref()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let tenant_id = tenant.tenant_id();
    let note_id = AggregateId::new();
    let cmd = DebitNoteCommand::Create(CreateDebitNote {
        tenant_id,
        note_id,
        reference: body.reference,
        vendor_code: body.vendor_code,
        grn_id,
        lines: body.lines,
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, &["finance.debit_notes.create"]).authorize(&tenant, &principal) {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services.dispatcher().execute::<DebitNote>(tenant_id, note_id, cmd, None) {
        Ok(d) => lifecycle::created(d.aggregate, &principal),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
