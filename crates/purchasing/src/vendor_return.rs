use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loomerp_core::lifecycle::{ChangeStatus, StatusChange, StatusLifecycle, StatusTracker, Transition};
use loomerp_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LifecycleAggregate, TenantId,
    TransitionRequest, UserId,
};
use loomerp_events::{Event, LifecycleEvent};

use crate::grn::{Discrepancy, DiscrepancyKind};

const VENDOR_RETURN_TRANSITIONS: &[Transition<VendorReturnStatus>] = {
    use VendorReturnStatus::*;
    &[
        Transition::new(Pending, Approved, "purchases.returns.approve"),
        Transition::new(Pending, Cancelled, "purchases.returns.cancel"),
        Transition::new(Approved, Dispatched, "purchases.returns.dispatch"),
        Transition::new(Dispatched, Acknowledged, "purchases.returns.acknowledge"),
    ]
};

pub static VENDOR_RETURN_LIFECYCLE: StatusLifecycle<VendorReturnStatus> = StatusLifecycle::new(
    "purchasing.vendor_return",
    VendorReturnStatus::Pending,
    VENDOR_RETURN_TRANSITIONS,
);

loomerp_core::lifecycle_status! {
    /// Vendor return status lifecycle.
    pub enum VendorReturnStatus: VENDOR_RETURN_LIFECYCLE {
        Pending = "pending",
        Approved = "approved",
        Dispatched = "dispatched",
        Acknowledged = "acknowledged",
        Cancelled = "cancelled",
    }
}

/// Why a vendor return exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnSource {
    /// Raised automatically from a GRN inspection discrepancy.
    Grn { grn_id: AggregateId, purchase_order_id: AggregateId },
    Manual,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnReason {
    Shortage,
    Excess,
    Defective,
    Other,
}

impl From<DiscrepancyKind> for ReturnReason {
    fn from(kind: DiscrepancyKind) -> Self {
        match kind {
            DiscrepancyKind::Shortage => ReturnReason::Shortage,
            DiscrepancyKind::Excess => ReturnReason::Excess,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorReturnLine {
    pub material_code: String,
    pub quantity: u32,
    pub reason: ReturnReason,
}

impl From<&Discrepancy> for VendorReturnLine {
    fn from(d: &Discrepancy) -> Self {
        Self {
            material_code: d.material_code.clone(),
            quantity: d.quantity,
            reason: d.kind.into(),
        }
    }
}

/// Aggregate root: VendorReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorReturn {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    reference: String,
    vendor_code: String,
    source: ReturnSource,
    lines: Vec<VendorReturnLine>,
    note: Option<String>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    lifecycle: StatusTracker<VendorReturnStatus>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl VendorReturn {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            vendor_code: String::new(),
            source: ReturnSource::Manual,
            lines: Vec::new(),
            note: None,
            created_by: None,
            created_at: None,
            lifecycle: StatusTracker::new(),
            version: 0,
            created: false,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn vendor_code(&self) -> &str {
        &self.vendor_code
    }

    pub fn source(&self) -> &ReturnSource {
        &self.source
    }

    pub fn lines(&self) -> &[VendorReturnLine] {
        &self.lines
    }

    pub fn status(&self) -> VendorReturnStatus {
        self.lifecycle.status()
    }
}

impl AggregateRoot for VendorReturn {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateVendorReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVendorReturn {
    pub tenant_id: TenantId,
    pub return_id: AggregateId,
    pub reference: String,
    pub vendor_code: String,
    pub source: ReturnSource,
    pub lines: Vec<VendorReturnLine>,
    pub note: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorReturnCommand {
    Create(CreateVendorReturn),
    ChangeStatus(ChangeStatus<VendorReturnStatus>),
}

/// Event: VendorReturnCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorReturnCreated {
    pub tenant_id: TenantId,
    pub return_id: AggregateId,
    pub reference: String,
    pub vendor_code: String,
    pub source: ReturnSource,
    pub lines: Vec<VendorReturnLine>,
    pub note: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorReturnEvent {
    Created(VendorReturnCreated),
    StatusChanged(StatusChange<VendorReturnStatus>),
}

impl Event for VendorReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            VendorReturnEvent::Created(_) => "purchasing.vendor_return.created",
            VendorReturnEvent::StatusChanged(_) => "purchasing.vendor_return.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            VendorReturnEvent::Created(e) => e.occurred_at,
            VendorReturnEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl LifecycleEvent for VendorReturnEvent {
    type Status = VendorReturnStatus;

    fn status_change(&self) -> Option<&StatusChange<VendorReturnStatus>> {
        match self {
            VendorReturnEvent::StatusChanged(change) => Some(change),
            _ => None,
        }
    }
}

impl Aggregate for VendorReturn {
    type Command = VendorReturnCommand;
    type Event = VendorReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            VendorReturnEvent::Created(e) => {
                self.id = e.return_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.vendor_code = e.vendor_code.clone();
                self.source = e.source.clone();
                self.lines = e.lines.clone();
                self.note = e.note.clone();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.lifecycle = StatusTracker::new();
                self.created = true;
            }
            VendorReturnEvent::StatusChanged(change) => self.lifecycle.apply(change),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            VendorReturnCommand::Create(cmd) => self.handle_create(cmd),
            VendorReturnCommand::ChangeStatus(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found());
                }
                if self.tenant_id != Some(cmd.tenant_id) || self.id != cmd.entity_id {
                    return Err(DomainError::invariant("tenant or return_id mismatch"));
                }
                Ok(self
                    .lifecycle
                    .decide(cmd.tenant_id, self.id, &cmd.request)?
                    .map(VendorReturnEvent::StatusChanged)
                    .into_iter()
                    .collect())
            }
        }
    }
}

impl LifecycleAggregate for VendorReturn {
    type Status = VendorReturnStatus;

    fn empty(id: AggregateId) -> Self {
        VendorReturn::empty(id)
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn status_tracker(&self) -> &StatusTracker<VendorReturnStatus> {
        &self.lifecycle
    }

    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<VendorReturnStatus>,
    ) -> VendorReturnCommand {
        VendorReturnCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            entity_id: id,
            request,
        })
    }
}

impl VendorReturn {
    fn handle_create(&self, cmd: &CreateVendorReturn) -> Result<Vec<VendorReturnEvent>, DomainError> {
        // Derived returns reuse a deterministic id; a second create is how duplicates surface.
        if self.created {
            return Err(DomainError::conflict("vendor return already exists"));
        }
        if cmd.vendor_code.trim().is_empty() {
            return Err(DomainError::validation("vendor_code cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("a vendor return needs at least one line"));
        }
        if cmd.lines.iter().any(|l| l.quantity == 0) {
            return Err(DomainError::validation("return quantities must be positive"));
        }

        Ok(vec![VendorReturnEvent::Created(VendorReturnCreated {
            tenant_id: cmd.tenant_id,
            return_id: cmd.return_id,
            reference: cmd.reference.clone(),
            vendor_code: cmd.vendor_code.clone(),
            source: cmd.source.clone(),
            lines: cmd.lines.clone(),
            note: cmd.note.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomerp_core::Actor;
    use loomerp_events::execute;

    fn create(tenant_id: TenantId, return_id: AggregateId) -> VendorReturnCommand {
        VendorReturnCommand::Create(CreateVendorReturn {
            tenant_id,
            return_id,
            reference: "VR-GRN-77".to_string(),
            vendor_code: "V-TRIMS".to_string(),
            source: ReturnSource::Manual,
            lines: vec![VendorReturnLine {
                material_code: "BTN-18L".to_string(),
                quantity: 200,
                reason: ReturnReason::Defective,
            }],
            note: Some("cracked buttons".to_string()),
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn move_to(vr: &mut VendorReturn, tenant_id: TenantId, target: VendorReturnStatus) -> Result<Vec<VendorReturnEvent>, DomainError> {
        let id = *vr.id();
        execute(
            vr,
            &VendorReturn::transition_command(tenant_id, id, TransitionRequest::new(target, Actor::system(), Utc::now())),
        )
    }

    #[test]
    fn second_create_with_the_same_id_conflicts() {
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let mut vr = VendorReturn::empty(id);

        execute(&mut vr, &create(tenant_id, id)).unwrap();
        assert!(matches!(
            execute(&mut vr, &create(tenant_id, id)),
            Err(DomainError::Conflict(_))
        ));
        assert_eq!(vr.version(), 1);
    }

    #[test]
    fn walks_the_happy_path_to_acknowledged() {
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let mut vr = VendorReturn::empty(id);
        execute(&mut vr, &create(tenant_id, id)).unwrap();

        for target in [
            VendorReturnStatus::Approved,
            VendorReturnStatus::Dispatched,
            VendorReturnStatus::Acknowledged,
        ] {
            move_to(&mut vr, tenant_id, target).unwrap();
        }

        assert_eq!(vr.status(), VendorReturnStatus::Acknowledged);
        assert!(vr.status_tracker().is_terminal());
    }

    #[test]
    fn dispatched_returns_cannot_be_cancelled() {
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let mut vr = VendorReturn::empty(id);
        execute(&mut vr, &create(tenant_id, id)).unwrap();
        move_to(&mut vr, tenant_id, VendorReturnStatus::Approved).unwrap();
        move_to(&mut vr, tenant_id, VendorReturnStatus::Dispatched).unwrap();

        let err = move_to(&mut vr, tenant_id, VendorReturnStatus::Cancelled).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn discrepancy_lines_map_to_return_reasons() {
        let line = VendorReturnLine::from(&Discrepancy {
            line_no: 1,
            po_line_no: 3,
            material_code: "ZIP-5".to_string(),
            kind: DiscrepancyKind::Excess,
            quantity: 12,
            unit_price: loomerp_finance::Money::from_minor(80),
        });
        assert_eq!(line.reason, ReturnReason::Excess);
        assert_eq!(line.quantity, 12);
    }
}
