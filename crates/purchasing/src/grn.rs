//! Goods Receipt Note: materials physically received against a purchase order.
//!
//! Store keepers record received/rejected quantities per line while the GRN is a draft,
//! then submit it for inspection. Inspection moves it to exactly one outcome
//! (`accepted`, `shortage` or `excess`), computed from the recorded quantities; the
//! requested target must match that outcome. Reaching an outcome also emits
//! [`GrnInspected`], which downstream processing (PO receipts, vendor returns, debit
//! notes) keys off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loomerp_core::lifecycle::{ChangeStatus, StatusChange, StatusLifecycle, StatusTracker, Transition};
use loomerp_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LifecycleAggregate, TenantId,
    TransitionRequest, UserId,
};
use loomerp_events::{Event, LifecycleEvent};
use loomerp_finance::Money;

const GRN_TRANSITIONS: &[Transition<GrnStatus>] = {
    use GrnStatus::*;
    &[
        Transition::new(Draft, Submitted, "purchases.grn.submit"),
        Transition::new(Draft, Cancelled, "purchases.grn.cancel"),
        Transition::new(Submitted, Accepted, "purchases.grn.inspect"),
        Transition::new(Submitted, Shortage, "purchases.grn.inspect"),
        Transition::new(Submitted, Excess, "purchases.grn.inspect"),
        Transition::new(Accepted, Closed, "purchases.grn.close"),
        Transition::new(Shortage, Closed, "purchases.grn.close"),
        Transition::new(Excess, Closed, "purchases.grn.close"),
    ]
};

pub static GRN_LIFECYCLE: StatusLifecycle<GrnStatus> =
    StatusLifecycle::new("purchasing.grn", GrnStatus::Draft, GRN_TRANSITIONS);

loomerp_core::lifecycle_status! {
    /// Goods receipt note status lifecycle.
    pub enum GrnStatus: GRN_LIFECYCLE {
        Draft = "draft",
        Submitted = "submitted",
        Accepted = "accepted",
        Shortage = "shortage",
        Excess = "excess",
        Closed = "closed",
        Cancelled = "cancelled",
    }
}

impl GrnStatus {
    /// Statuses that record an inspection outcome.
    pub fn is_inspection_outcome(self) -> bool {
        matches!(self, GrnStatus::Accepted | GrnStatus::Shortage | GrnStatus::Excess)
    }
}

/// A GRN line, mirroring one purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnLine {
    pub line_no: u32,
    pub po_line_no: u32,
    pub material_code: String,
    pub ordered: u32,
    pub unit_price: Money,
    pub received: u32,
    pub rejected: u32,
}

impl GrnLine {
    /// Received minus rejected at inspection.
    pub fn accepted(&self) -> u32 {
        self.received.saturating_sub(self.rejected)
    }

    pub fn discrepancy(&self) -> Option<Discrepancy> {
        let (kind, quantity) = if self.accepted() < self.ordered {
            (DiscrepancyKind::Shortage, self.ordered - self.accepted())
        } else if self.received > self.ordered {
            (DiscrepancyKind::Excess, self.received - self.ordered)
        } else {
            return None;
        };

        Some(Discrepancy {
            line_no: self.line_no,
            po_line_no: self.po_line_no,
            material_code: self.material_code.clone(),
            kind,
            quantity,
            unit_price: self.unit_price,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    Shortage,
    Excess,
}

/// Quantity difference between what was ordered and what was accepted on one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub line_no: u32,
    pub po_line_no: u32,
    pub material_code: String,
    pub kind: DiscrepancyKind,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Compute the inspection outcome for a set of lines.
///
/// Shortage wins over excess: any line accepted below its ordered quantity makes the
/// whole GRN a shortage.
pub fn inspection_outcome(lines: &[GrnLine]) -> GrnStatus {
    if lines.iter().any(|l| l.accepted() < l.ordered) {
        GrnStatus::Shortage
    } else if lines.iter().any(|l| l.received > l.ordered) {
        GrnStatus::Excess
    } else {
        GrnStatus::Accepted
    }
}

/// Aggregate root: GoodsReceiptNote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoodsReceiptNote {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    reference: String,
    purchase_order_id: Option<AggregateId>,
    vendor_code: String,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    lifecycle: StatusTracker<GrnStatus>,
    lines: Vec<GrnLine>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl GoodsReceiptNote {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            purchase_order_id: None,
            vendor_code: String::new(),
            created_by: None,
            created_at: None,
            lifecycle: StatusTracker::new(),
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn purchase_order_id(&self) -> Option<AggregateId> {
        self.purchase_order_id
    }

    pub fn vendor_code(&self) -> &str {
        &self.vendor_code
    }

    pub fn status(&self) -> GrnStatus {
        self.lifecycle.status()
    }

    pub fn lines(&self) -> &[GrnLine] {
        &self.lines
    }

    /// Outcome inspection would reach with the quantities recorded so far.
    pub fn inspection_outcome(&self) -> GrnStatus {
        inspection_outcome(&self.lines)
    }

    pub fn discrepancies(&self) -> Vec<Discrepancy> {
        self.lines.iter().filter_map(GrnLine::discrepancy).collect()
    }
}

impl AggregateRoot for GoodsReceiptNote {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Expected line on a new GRN (copied from the purchase order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedLine {
    pub po_line_no: u32,
    pub material_code: String,
    pub ordered: u32,
    pub unit_price: Money,
}

/// Command: CreateGrn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGrn {
    pub tenant_id: TenantId,
    pub grn_id: AggregateId,
    pub reference: String,
    pub purchase_order_id: AggregateId,
    pub vendor_code: String,
    pub lines: Vec<ExpectedLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReceivedQuantity (draft only; overwrites the line's figures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceivedQuantity {
    pub tenant_id: TenantId,
    pub grn_id: AggregateId,
    pub line_no: u32,
    pub received: u32,
    pub rejected: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrnCommand {
    Create(CreateGrn),
    RecordReceivedQuantity(RecordReceivedQuantity),
    ChangeStatus(ChangeStatus<GrnStatus>),
}

/// Event: GrnCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnCreated {
    pub tenant_id: TenantId,
    pub grn_id: AggregateId,
    pub reference: String,
    pub purchase_order_id: AggregateId,
    pub vendor_code: String,
    pub lines: Vec<GrnLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceivedQuantityRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedQuantityRecorded {
    pub tenant_id: TenantId,
    pub grn_id: AggregateId,
    pub line_no: u32,
    pub received: u32,
    pub rejected: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GrnInspected. Emitted together with the status change into an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnInspected {
    pub tenant_id: TenantId,
    pub grn_id: AggregateId,
    pub grn_reference: String,
    pub purchase_order_id: AggregateId,
    pub vendor_code: String,
    pub outcome: GrnStatus,
    pub lines: Vec<GrnLine>,
    pub occurred_at: DateTime<Utc>,
}

impl GrnInspected {
    pub fn discrepancies(&self) -> Vec<Discrepancy> {
        self.lines.iter().filter_map(GrnLine::discrepancy).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrnEvent {
    Created(GrnCreated),
    ReceivedQuantityRecorded(ReceivedQuantityRecorded),
    StatusChanged(StatusChange<GrnStatus>),
    Inspected(GrnInspected),
}

pub const GRN_INSPECTED_EVENT: &str = "purchasing.grn.inspected";

impl Event for GrnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GrnEvent::Created(_) => "purchasing.grn.created",
            GrnEvent::ReceivedQuantityRecorded(_) => "purchasing.grn.received_quantity_recorded",
            GrnEvent::StatusChanged(_) => "purchasing.grn.status_changed",
            GrnEvent::Inspected(_) => GRN_INSPECTED_EVENT,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GrnEvent::Created(e) => e.occurred_at,
            GrnEvent::ReceivedQuantityRecorded(e) => e.occurred_at,
            GrnEvent::StatusChanged(e) => e.occurred_at,
            GrnEvent::Inspected(e) => e.occurred_at,
        }
    }
}

impl LifecycleEvent for GrnEvent {
    type Status = GrnStatus;

    fn status_change(&self) -> Option<&StatusChange<GrnStatus>> {
        match self {
            GrnEvent::StatusChanged(change) => Some(change),
            _ => None,
        }
    }
}

impl Aggregate for GoodsReceiptNote {
    type Command = GrnCommand;
    type Event = GrnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GrnEvent::Created(e) => {
                self.id = e.grn_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.purchase_order_id = Some(e.purchase_order_id);
                self.vendor_code = e.vendor_code.clone();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.lifecycle = StatusTracker::new();
                self.lines = e.lines.clone();
                self.created = true;
            }
            GrnEvent::ReceivedQuantityRecorded(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.received = e.received;
                    line.rejected = e.rejected;
                }
            }
            GrnEvent::StatusChanged(change) => self.lifecycle.apply(change),
            GrnEvent::Inspected(_) => {}
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            GrnCommand::Create(cmd) => self.handle_create(cmd),
            GrnCommand::RecordReceivedQuantity(cmd) => self.handle_record_quantity(cmd),
            GrnCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl LifecycleAggregate for GoodsReceiptNote {
    type Status = GrnStatus;

    fn empty(id: AggregateId) -> Self {
        GoodsReceiptNote::empty(id)
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn status_tracker(&self) -> &StatusTracker<GrnStatus> {
        &self.lifecycle
    }

    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<GrnStatus>,
    ) -> GrnCommand {
        GrnCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            entity_id: id,
            request,
        })
    }
}

impl GoodsReceiptNote {
    fn ensure_target(&self, tenant_id: TenantId, grn_id: AggregateId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != grn_id {
            return Err(DomainError::invariant("grn_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateGrn) -> Result<Vec<GrnEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("goods receipt note already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("reference cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("a goods receipt note needs at least one line"));
        }
        if let Some(line) = cmd.lines.iter().find(|l| l.ordered == 0) {
            return Err(DomainError::validation(format!(
                "ordered quantity for PO line {} must be positive",
                line.po_line_no
            )));
        }

        let lines = cmd
            .lines
            .iter()
            .enumerate()
            .map(|(idx, l)| GrnLine {
                line_no: idx as u32 + 1,
                po_line_no: l.po_line_no,
                material_code: l.material_code.clone(),
                ordered: l.ordered,
                unit_price: l.unit_price,
                received: 0,
                rejected: 0,
            })
            .collect();

        Ok(vec![GrnEvent::Created(GrnCreated {
            tenant_id: cmd.tenant_id,
            grn_id: cmd.grn_id,
            reference: cmd.reference.trim().to_string(),
            purchase_order_id: cmd.purchase_order_id,
            vendor_code: cmd.vendor_code.clone(),
            lines,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_quantity(&self, cmd: &RecordReceivedQuantity) -> Result<Vec<GrnEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.grn_id)?;

        if self.status() != GrnStatus::Draft {
            return Err(DomainError::invariant(format!(
                "quantities can only be recorded while draft (status is '{}')",
                self.status()
            )));
        }
        let line = self
            .lines
            .iter()
            .find(|l| l.line_no == cmd.line_no)
            .ok_or_else(|| DomainError::validation(format!("unknown line {}", cmd.line_no)))?;
        if cmd.rejected > cmd.received {
            return Err(DomainError::validation(format!(
                "line {}: rejected ({}) exceeds received ({})",
                line.line_no, cmd.rejected, cmd.received
            )));
        }
        if line.received == cmd.received && line.rejected == cmd.rejected {
            return Ok(vec![]);
        }

        Ok(vec![GrnEvent::ReceivedQuantityRecorded(ReceivedQuantityRecorded {
            tenant_id: cmd.tenant_id,
            grn_id: cmd.grn_id,
            line_no: cmd.line_no,
            received: cmd.received,
            rejected: cmd.rejected,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus<GrnStatus>) -> Result<Vec<GrnEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.entity_id)?;

        let Some(change) = self.lifecycle.decide(cmd.tenant_id, self.id, &cmd.request)? else {
            return Ok(vec![]);
        };

        if !change.to.is_inspection_outcome() {
            return Ok(vec![GrnEvent::StatusChanged(change)]);
        }

        let outcome = self.inspection_outcome();
        if change.to != outcome {
            return Err(DomainError::validation(format!(
                "recorded quantities make this GRN '{outcome}', not '{}'",
                change.to
            )));
        }

        let inspected = GrnInspected {
            tenant_id: cmd.tenant_id,
            grn_id: self.id,
            grn_reference: self.reference.clone(),
            purchase_order_id: self
                .purchase_order_id
                .ok_or_else(|| DomainError::invariant("purchase order must be set"))?,
            vendor_code: self.vendor_code.clone(),
            outcome,
            lines: self.lines.clone(),
            occurred_at: change.occurred_at,
        };

        Ok(vec![GrnEvent::StatusChanged(change), GrnEvent::Inspected(inspected)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomerp_core::Actor;
    use loomerp_events::execute;
    use uuid::Uuid;

    fn store_keeper() -> Actor {
        Actor::new(UserId::new(), ["purchases.grn.submit", "purchases.grn.cancel"])
    }

    fn inspector() -> Actor {
        Actor::new(UserId::new(), ["purchases.grn.inspect"])
    }

    fn draft_grn(tenant_id: TenantId, grn_id: AggregateId, ordered: &[u32]) -> GoodsReceiptNote {
        let mut grn = GoodsReceiptNote::empty(grn_id);
        let lines = ordered
            .iter()
            .enumerate()
            .map(|(idx, qty)| ExpectedLine {
                po_line_no: idx as u32 + 1,
                material_code: format!("TRIM-{idx}"),
                ordered: *qty,
                unit_price: Money::from_minor(250),
            })
            .collect();
        execute(
            &mut grn,
            &GrnCommand::Create(CreateGrn {
                tenant_id,
                grn_id,
                reference: "GRN-77".to_string(),
                purchase_order_id: AggregateId::new(),
                vendor_code: "V-TRIMS".to_string(),
                lines,
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        grn
    }

    fn record(grn: &mut GoodsReceiptNote, tenant_id: TenantId, line_no: u32, received: u32, rejected: u32) {
        let grn_id = *grn.id();
        execute(
            grn,
            &GrnCommand::RecordReceivedQuantity(RecordReceivedQuantity {
                tenant_id,
                grn_id,
                line_no,
                received,
                rejected,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
    }

    fn move_to(
        grn: &mut GoodsReceiptNote,
        tenant_id: TenantId,
        target: GrnStatus,
        actor: Actor,
    ) -> Result<Vec<GrnEvent>, DomainError> {
        let grn_id = *grn.id();
        let cmd = GoodsReceiptNote::transition_command(
            tenant_id,
            grn_id,
            TransitionRequest::new(target, actor, Utc::now()),
        );
        execute(grn, &cmd)
    }

    #[test]
    fn outcome_prefers_shortage_over_excess() {
        let tenant_id = TenantId::new();
        let mut grn = draft_grn(tenant_id, AggregateId::new(), &[10, 10]);
        record(&mut grn, tenant_id, 1, 12, 0);
        // Line 2 not counted yet: still short.
        assert_eq!(grn.inspection_outcome(), GrnStatus::Shortage);

        record(&mut grn, tenant_id, 2, 10, 0);
        assert_eq!(grn.inspection_outcome(), GrnStatus::Excess);

        record(&mut grn, tenant_id, 2, 10, 3);
        assert_eq!(grn.inspection_outcome(), GrnStatus::Shortage);

        let kinds: Vec<_> = grn.discrepancies().into_iter().map(|d| (d.kind, d.quantity)).collect();
        assert_eq!(
            kinds,
            vec![(DiscrepancyKind::Excess, 2), (DiscrepancyKind::Shortage, 3)]
        );
    }

    #[test]
    fn exact_receipt_is_accepted_without_discrepancies() {
        let tenant_id = TenantId::new();
        let mut grn = draft_grn(tenant_id, AggregateId::new(), &[5]);
        record(&mut grn, tenant_id, 1, 5, 0);

        assert_eq!(grn.inspection_outcome(), GrnStatus::Accepted);
        assert!(grn.discrepancies().is_empty());
    }

    #[test]
    fn rejected_cannot_exceed_received() {
        let tenant_id = TenantId::new();
        let mut grn = draft_grn(tenant_id, AggregateId::new(), &[5]);
        let grn_id = *grn.id();

        let err = execute(
            &mut grn,
            &GrnCommand::RecordReceivedQuantity(RecordReceivedQuantity {
                tenant_id,
                grn_id,
                line_no: 1,
                received: 2,
                rejected: 3,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn inspection_target_must_match_recorded_quantities() {
        let tenant_id = TenantId::new();
        let mut grn = draft_grn(tenant_id, AggregateId::new(), &[100]);
        record(&mut grn, tenant_id, 1, 90, 0);
        move_to(&mut grn, tenant_id, GrnStatus::Submitted, store_keeper()).unwrap();

        let err = move_to(&mut grn, tenant_id, GrnStatus::Accepted, inspector()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("shortage")));
        assert_eq!(grn.status(), GrnStatus::Submitted);

        let events = move_to(&mut grn, tenant_id, GrnStatus::Shortage, inspector()).unwrap();
        assert_eq!(events.len(), 2);
        let GrnEvent::Inspected(inspected) = &events[1] else {
            panic!("expected inspection event, got {:?}", events[1]);
        };
        assert_eq!(inspected.outcome, GrnStatus::Shortage);
        assert_eq!(inspected.discrepancies()[0].quantity, 10);
    }

    #[test]
    fn store_keeper_cannot_inspect() {
        let tenant_id = TenantId::new();
        let mut grn = draft_grn(tenant_id, AggregateId::new(), &[1]);
        record(&mut grn, tenant_id, 1, 1, 0);
        move_to(&mut grn, tenant_id, GrnStatus::Submitted, store_keeper()).unwrap();

        let err = move_to(&mut grn, tenant_id, GrnStatus::Accepted, store_keeper()).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn quantities_are_frozen_after_submission() {
        let tenant_id = TenantId::new();
        let mut grn = draft_grn(tenant_id, AggregateId::new(), &[1]);
        move_to(&mut grn, tenant_id, GrnStatus::Submitted, store_keeper()).unwrap();
        let grn_id = *grn.id();

        let err = execute(
            &mut grn,
            &GrnCommand::RecordReceivedQuantity(RecordReceivedQuantity {
                tenant_id,
                grn_id,
                line_no: 1,
                received: 1,
                rejected: 0,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn duplicate_inspection_request_does_not_reemit_inspected() {
        let tenant_id = TenantId::new();
        let mut grn = draft_grn(tenant_id, AggregateId::new(), &[4]);
        record(&mut grn, tenant_id, 1, 6, 0);
        move_to(&mut grn, tenant_id, GrnStatus::Submitted, store_keeper()).unwrap();

        let grn_id = *grn.id();
        let cmd = GoodsReceiptNote::transition_command(
            tenant_id,
            grn_id,
            TransitionRequest::new(GrnStatus::Excess, inspector(), Utc::now())
                .with_request_id(Uuid::now_v7()),
        );
        assert_eq!(execute(&mut grn, &cmd).unwrap().len(), 2);
        assert!(execute(&mut grn, &cmd).unwrap().is_empty());
    }
}
