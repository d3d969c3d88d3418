use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loomerp_core::{Actor, AggregateId, AggregateRoot, LifecycleAggregate, LifecycleStatus, StatusStamp};
use loomerp_finance::{DebitNoteLine, Money};
use loomerp_infra::workflow::TransitionOutcome;
use loomerp_inventory::MaterialLine;
use loomerp_purchasing::VendorReturnLine;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct TransitionRequestBody {
    pub target: String,
    pub reason: Option<String>,
    /// Idempotency key: repeating a request id is a no-op.
    pub request_id: Option<Uuid>,
    /// Rejects the transition with 409 when the document has moved on.
    pub expected_version: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderLineRequest {
    pub material_code: String,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub reference: String,
    pub vendor_code: String,
    #[serde(default)]
    pub lines: Vec<PurchaseOrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGrnRequest {
    pub reference: String,
    pub purchase_order_id: String,
    /// Defaults to the order's outstanding quantities.
    pub lines: Option<Vec<GrnLineRequest>>,
}

/// Order line expected on a GRN. Material and price are taken from the order.
#[derive(Debug, Deserialize)]
pub struct GrnLineRequest {
    pub po_line_no: u32,
    pub ordered: u32,
}

#[derive(Debug, Deserialize)]
pub struct RecordReceivedQuantityRequest {
    pub received: u32,
    #[serde(default)]
    pub rejected: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateVendorReturnRequest {
    pub reference: String,
    pub vendor_code: String,
    pub lines: Vec<VendorReturnLine>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCreditNoteRequest {
    pub reference: String,
    pub vendor_code: String,
    pub vendor_return_id: Option<String>,
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct SettlementRequest {
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct CreateDebitNoteRequest {
    pub reference: String,
    pub vendor_code: String,
    pub grn_id: Option<String>,
    pub lines: Vec<DebitNoteLine>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMaterialRequestRequest {
    pub reference: String,
    pub department: String,
    pub production_order_ref: Option<String>,
    pub lines: Vec<MaterialLine>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMaterialReturnRequest {
    pub reference: String,
    pub department: String,
    pub material_request_id: Option<String>,
    pub lines: Vec<MaterialLine>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateShipmentRequest {
    pub reference: String,
    pub customer_code: String,
    pub sales_order_ref: Option<String>,
    pub cartons: u32,
}

#[derive(Debug, Deserialize)]
pub struct AssignCarrierRequest {
    pub carrier: String,
    pub tracking_number: String,
}

// -------------------------
// Response DTOs
// -------------------------

fn allowed_for<A: LifecycleAggregate>(aggregate: &A, actor: &Actor) -> Vec<&'static str> {
    <A::Status as LifecycleStatus>::lifecycle()
        .allowed_targets_for(aggregate.status(), actor)
        .iter()
        .map(|s| s.as_str())
        .collect()
}

/// A rehydrated document with its stream version and the moves open to the caller.
#[derive(Debug, Serialize)]
pub struct DocumentResponse<A> {
    pub id: AggregateId,
    pub entity: &'static str,
    pub status: &'static str,
    pub version: u64,
    pub allowed_targets: Vec<&'static str>,
    pub document: A,
}

impl<A: LifecycleAggregate> DocumentResponse<A> {
    pub fn new(aggregate: A, actor: &Actor) -> Self {
        Self {
            id: *aggregate.id(),
            entity: A::aggregate_type(),
            status: aggregate.status().as_str(),
            version: aggregate.version(),
            allowed_targets: allowed_for(&aggregate, actor),
            document: aggregate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub id: AggregateId,
    pub entity: &'static str,
    pub status: &'static str,
    /// False when the request id had already been applied.
    pub changed: bool,
    pub version: u64,
    pub allowed_targets: Vec<&'static str>,
}

impl TransitionResponse {
    pub fn new<A: LifecycleAggregate>(outcome: &TransitionOutcome<A>, actor: &Actor) -> Self {
        Self {
            id: *outcome.aggregate.id(),
            entity: A::aggregate_type(),
            status: outcome.aggregate.status().as_str(),
            changed: outcome.changed,
            version: outcome.version,
            allowed_targets: allowed_for(&outcome.aggregate, actor),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AllowedTargetsResponse {
    pub id: AggregateId,
    pub status: &'static str,
    pub allowed_targets: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse<S> {
    pub id: AggregateId,
    pub entity: &'static str,
    pub status: S,
    pub history: Vec<StatusStamp<S>>,
}

impl<S: LifecycleStatus> HistoryResponse<S> {
    pub fn of<A: LifecycleAggregate<Status = S>>(aggregate: &A) -> Self {
        Self {
            id: *aggregate.id(),
            entity: A::aggregate_type(),
            status: aggregate.status(),
            history: aggregate.status_tracker().history().to_vec(),
        }
    }
}
