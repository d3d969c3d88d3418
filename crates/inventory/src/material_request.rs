use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loomerp_core::lifecycle::{ChangeStatus, StatusChange, StatusLifecycle, StatusTracker, Transition};
use loomerp_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LifecycleAggregate, TenantId,
    TransitionRequest, UserId,
};
use loomerp_events::{Event, LifecycleEvent};

const MATERIAL_REQUEST_TRANSITIONS: &[Transition<MaterialRequestStatus>] = {
    use MaterialRequestStatus::*;
    &[
        Transition::new(Requested, Approved, "inventory.material_requests.approve"),
        Transition::new(Requested, Rejected, "inventory.material_requests.approve"),
        Transition::new(Requested, Cancelled, "inventory.material_requests.cancel"),
        Transition::new(Approved, Issued, "inventory.material_requests.issue"),
        Transition::new(Issued, Closed, "inventory.material_requests.close"),
    ]
};

pub static MATERIAL_REQUEST_LIFECYCLE: StatusLifecycle<MaterialRequestStatus> = StatusLifecycle::new(
    "inventory.material_request",
    MaterialRequestStatus::Requested,
    MATERIAL_REQUEST_TRANSITIONS,
);

loomerp_core::lifecycle_status! {
    /// Material request status lifecycle.
    pub enum MaterialRequestStatus: MATERIAL_REQUEST_LIFECYCLE {
        Requested = "requested",
        Approved = "approved",
        Rejected = "rejected",
        Issued = "issued",
        Closed = "closed",
        Cancelled = "cancelled",
    }
}

/// A material and quantity moving between production and stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLine {
    pub material_code: String,
    pub quantity: u32,
    /// Unit of measure as used on the shop floor ("m", "pcs", "kg").
    pub unit: String,
}

pub(crate) fn validate_lines(lines: &[MaterialLine]) -> Result<(), DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("at least one material line is required"));
    }
    for line in lines {
        if line.material_code.trim().is_empty() {
            return Err(DomainError::validation("material_code cannot be empty"));
        }
        if line.quantity == 0 {
            return Err(DomainError::validation(format!(
                "quantity for '{}' must be positive",
                line.material_code
            )));
        }
    }
    Ok(())
}

/// Aggregate root: MaterialRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialRequest {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    reference: String,
    department: String,
    production_order_ref: Option<String>,
    lines: Vec<MaterialLine>,
    requested_by: Option<UserId>,
    requested_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    lifecycle: StatusTracker<MaterialRequestStatus>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl MaterialRequest {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            department: String::new(),
            production_order_ref: None,
            lines: Vec::new(),
            requested_by: None,
            requested_at: None,
            lifecycle: StatusTracker::new(),
            version: 0,
            created: false,
        }
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    pub fn lines(&self) -> &[MaterialLine] {
        &self.lines
    }

    pub fn status(&self) -> MaterialRequestStatus {
        self.lifecycle.status()
    }
}

impl AggregateRoot for MaterialRequest {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateMaterialRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMaterialRequest {
    pub tenant_id: TenantId,
    pub request_id: AggregateId,
    pub reference: String,
    pub department: String,
    pub production_order_ref: Option<String>,
    pub lines: Vec<MaterialLine>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialRequestCommand {
    Create(CreateMaterialRequest),
    ChangeStatus(ChangeStatus<MaterialRequestStatus>),
}

/// Event: MaterialRequestCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequestCreated {
    pub tenant_id: TenantId,
    pub request_id: AggregateId,
    pub reference: String,
    pub department: String,
    pub production_order_ref: Option<String>,
    pub lines: Vec<MaterialLine>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialRequestEvent {
    Created(MaterialRequestCreated),
    StatusChanged(StatusChange<MaterialRequestStatus>),
}

impl Event for MaterialRequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MaterialRequestEvent::Created(_) => "inventory.material_request.created",
            MaterialRequestEvent::StatusChanged(_) => "inventory.material_request.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MaterialRequestEvent::Created(e) => e.occurred_at,
            MaterialRequestEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl LifecycleEvent for MaterialRequestEvent {
    type Status = MaterialRequestStatus;

    fn status_change(&self) -> Option<&StatusChange<MaterialRequestStatus>> {
        match self {
            MaterialRequestEvent::StatusChanged(change) => Some(change),
            _ => None,
        }
    }
}

impl Aggregate for MaterialRequest {
    type Command = MaterialRequestCommand;
    type Event = MaterialRequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MaterialRequestEvent::Created(e) => {
                self.id = e.request_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.department = e.department.clone();
                self.production_order_ref = e.production_order_ref.clone();
                self.lines = e.lines.clone();
                self.requested_by = Some(e.requested_by);
                self.requested_at = Some(e.occurred_at);
                self.lifecycle = StatusTracker::new();
                self.created = true;
            }
            MaterialRequestEvent::StatusChanged(change) => self.lifecycle.apply(change),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MaterialRequestCommand::Create(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("material request already exists"));
                }
                if cmd.department.trim().is_empty() {
                    return Err(DomainError::validation("department cannot be empty"));
                }
                validate_lines(&cmd.lines)?;

                Ok(vec![MaterialRequestEvent::Created(MaterialRequestCreated {
                    tenant_id: cmd.tenant_id,
                    request_id: cmd.request_id,
                    reference: cmd.reference.trim().to_string(),
                    department: cmd.department.trim().to_string(),
                    production_order_ref: cmd.production_order_ref.clone(),
                    lines: cmd.lines.clone(),
                    requested_by: cmd.requested_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            MaterialRequestCommand::ChangeStatus(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found());
                }
                if self.tenant_id != Some(cmd.tenant_id) || self.id != cmd.entity_id {
                    return Err(DomainError::invariant("tenant or request_id mismatch"));
                }
                Ok(self
                    .lifecycle
                    .decide(cmd.tenant_id, self.id, &cmd.request)?
                    .map(MaterialRequestEvent::StatusChanged)
                    .into_iter()
                    .collect())
            }
        }
    }
}

impl LifecycleAggregate for MaterialRequest {
    type Status = MaterialRequestStatus;

    fn empty(id: AggregateId) -> Self {
        MaterialRequest::empty(id)
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn status_tracker(&self) -> &StatusTracker<MaterialRequestStatus> {
        &self.lifecycle
    }

    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<MaterialRequestStatus>,
    ) -> MaterialRequestCommand {
        MaterialRequestCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            entity_id: id,
            request,
        })
    }
}
