use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loomerp_core::lifecycle::{ChangeStatus, StatusChange, StatusLifecycle, StatusTracker, Transition};
use loomerp_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LifecycleAggregate, TenantId,
    TransitionRequest, UserId,
};
use loomerp_events::{Event, LifecycleEvent};

use crate::material_request::{validate_lines, MaterialLine};

const MATERIAL_RETURN_TRANSITIONS: &[Transition<MaterialReturnStatus>] = {
    use MaterialReturnStatus::*;
    &[
        Transition::new(Submitted, Approved, "inventory.material_returns.approve"),
        Transition::new(Submitted, Rejected, "inventory.material_returns.approve"),
        Transition::new(Approved, Received, "inventory.material_returns.receive"),
    ]
};

pub static MATERIAL_RETURN_LIFECYCLE: StatusLifecycle<MaterialReturnStatus> = StatusLifecycle::new(
    "inventory.material_return",
    MaterialReturnStatus::Submitted,
    MATERIAL_RETURN_TRANSITIONS,
);

loomerp_core::lifecycle_status! {
    /// Material return status lifecycle.
    pub enum MaterialReturnStatus: MATERIAL_RETURN_LIFECYCLE {
        Submitted = "submitted",
        Approved = "approved",
        Rejected = "rejected",
        Received = "received",
    }
}

/// Aggregate root: MaterialReturn (production → stores).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialReturn {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    reference: String,
    department: String,
    material_request_id: Option<AggregateId>,
    lines: Vec<MaterialLine>,
    reason: Option<String>,
    submitted_by: Option<UserId>,
    submitted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    lifecycle: StatusTracker<MaterialReturnStatus>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl MaterialReturn {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            department: String::new(),
            material_request_id: None,
            lines: Vec::new(),
            reason: None,
            submitted_by: None,
            submitted_at: None,
            lifecycle: StatusTracker::new(),
            version: 0,
            created: false,
        }
    }

    pub fn material_request_id(&self) -> Option<AggregateId> {
        self.material_request_id
    }

    pub fn lines(&self) -> &[MaterialLine] {
        &self.lines
    }

    pub fn status(&self) -> MaterialReturnStatus {
        self.lifecycle.status()
    }
}

impl AggregateRoot for MaterialReturn {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMaterialReturn {
    pub tenant_id: TenantId,
    pub return_id: AggregateId,
    pub reference: String,
    pub department: String,
    pub material_request_id: Option<AggregateId>,
    pub lines: Vec<MaterialLine>,
    pub reason: Option<String>,
    pub submitted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialReturnCommand {
    Create(CreateMaterialReturn),
    ChangeStatus(ChangeStatus<MaterialReturnStatus>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialReturnCreated {
    pub tenant_id: TenantId,
    pub return_id: AggregateId,
    pub reference: String,
    pub department: String,
    pub material_request_id: Option<AggregateId>,
    pub lines: Vec<MaterialLine>,
    pub reason: Option<String>,
    pub submitted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialReturnEvent {
    Created(MaterialReturnCreated),
    StatusChanged(StatusChange<MaterialReturnStatus>),
}

impl Event for MaterialReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MaterialReturnEvent::Created(_) => "inventory.material_return.created",
            MaterialReturnEvent::StatusChanged(_) => "inventory.material_return.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MaterialReturnEvent::Created(e) => e.occurred_at,
            MaterialReturnEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl LifecycleEvent for MaterialReturnEvent {
    type Status = MaterialReturnStatus;

    fn status_change(&self) -> Option<&StatusChange<MaterialReturnStatus>> {
        match self {
            MaterialReturnEvent::StatusChanged(change) => Some(change),
            _ => None,
        }
    }
}

impl Aggregate for MaterialReturn {
    type Command = MaterialReturnCommand;
    type Event = MaterialReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MaterialReturnEvent::Created(e) => {
                self.id = e.return_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.department = e.department.clone();
                self.material_request_id = e.material_request_id;
                self.lines = e.lines.clone();
                self.reason = e.reason.clone();
                self.submitted_by = Some(e.submitted_by);
                self.submitted_at = Some(e.occurred_at);
                self.lifecycle = StatusTracker::new();
                self.created = true;
            }
            MaterialReturnEvent::StatusChanged(change) => self.lifecycle.apply(change),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MaterialReturnCommand::Create(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("material return already exists"));
                }
                if cmd.department.trim().is_empty() {
                    return Err(DomainError::validation("department cannot be empty"));
                }
                validate_lines(&cmd.lines)?;

                Ok(vec![MaterialReturnEvent::Created(MaterialReturnCreated {
                    tenant_id: cmd.tenant_id,
                    return_id: cmd.return_id,
                    reference: cmd.reference.trim().to_string(),
                    department: cmd.department.trim().to_string(),
                    material_request_id: cmd.material_request_id,
                    lines: cmd.lines.clone(),
                    reason: cmd.reason.clone(),
                    submitted_by: cmd.submitted_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            MaterialReturnCommand::ChangeStatus(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found());
                }
                if self.tenant_id != Some(cmd.tenant_id) || self.id != cmd.entity_id {
                    return Err(DomainError::invariant("tenant or return_id mismatch"));
                }
                Ok(self
                    .lifecycle
                    .decide(cmd.tenant_id, self.id, &cmd.request)?
                    .map(MaterialReturnEvent::StatusChanged)
                    .into_iter()
                    .collect())
            }
        }
    }
}

impl LifecycleAggregate for MaterialReturn {
    type Status = MaterialReturnStatus;

    fn empty(id: AggregateId) -> Self {
        MaterialReturn::empty(id)
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn status_tracker(&self) -> &StatusTracker<MaterialReturnStatus> {
        &self.lifecycle
    }

    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<MaterialReturnStatus>,
    ) -> MaterialReturnCommand {
        MaterialReturnCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            entity_id: id,
            request,
        })
    }
}
