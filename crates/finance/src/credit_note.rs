use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loomerp_core::lifecycle::{ChangeStatus, StatusChange, StatusLifecycle, StatusTracker, Transition};
use loomerp_core::{
    Actor, Aggregate, AggregateId, AggregateRoot, DomainError, LifecycleAggregate, TenantId,
    TransitionRequest, UserId,
};
use loomerp_events::{Event, LifecycleEvent};

use crate::money::Money;

const CREDIT_NOTE_TRANSITIONS: &[Transition<CreditNoteStatus>] = {
    use CreditNoteStatus::*;
    &[
        Transition::new(Draft, Issued, "finance.credit_notes.issue"),
        Transition::new(Draft, Cancelled, "finance.credit_notes.cancel"),
        Transition::new(Issued, Accepted, "finance.credit_notes.accept"),
        Transition::new(Issued, Rejected, "finance.credit_notes.accept"),
        Transition::new(Accepted, Settled, "finance.credit_notes.settle"),
    ]
};

pub static CREDIT_NOTE_LIFECYCLE: StatusLifecycle<CreditNoteStatus> = StatusLifecycle::new(
    "finance.credit_note",
    CreditNoteStatus::Draft,
    CREDIT_NOTE_TRANSITIONS,
);

loomerp_core::lifecycle_status! {
    /// Credit note status lifecycle.
    pub enum CreditNoteStatus: CREDIT_NOTE_LIFECYCLE {
        Draft = "draft",
        Issued = "issued",
        Accepted = "accepted",
        Rejected = "rejected",
        Settled = "settled",
        Cancelled = "cancelled",
    }
}

/// Aggregate root: CreditNote (vendor credits the buyer for returned/disputed goods).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditNote {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    reference: String,
    vendor_code: String,
    vendor_return_id: Option<AggregateId>,
    amount: Money,
    settled: Money,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    lifecycle: StatusTracker<CreditNoteStatus>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl CreditNote {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            vendor_code: String::new(),
            vendor_return_id: None,
            amount: Money::ZERO,
            settled: Money::ZERO,
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

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn settled(&self) -> Money {
        self.settled
    }

    pub fn outstanding(&self) -> Money {
        Money::from_minor(self.amount.minor().saturating_sub(self.settled.minor()))
    }

    pub fn status(&self) -> CreditNoteStatus {
        self.lifecycle.status()
    }
}

impl AggregateRoot for CreditNote {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateCreditNote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCreditNote {
    pub tenant_id: TenantId,
    pub note_id: AggregateId,
    pub reference: String,
    pub vendor_code: String,
    pub vendor_return_id: Option<AggregateId>,
    pub amount: Money,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordSettlement (accepted notes only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSettlement {
    pub tenant_id: TenantId,
    pub note_id: AggregateId,
    pub amount: Money,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditNoteCommand {
    Create(CreateCreditNote),
    ChangeStatus(ChangeStatus<CreditNoteStatus>),
    RecordSettlement(RecordSettlement),
}

/// Event: CreditNoteCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteCreated {
    pub tenant_id: TenantId,
    pub note_id: AggregateId,
    pub reference: String,
    pub vendor_code: String,
    pub vendor_return_id: Option<AggregateId>,
    pub amount: Money,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecorded {
    pub tenant_id: TenantId,
    pub note_id: AggregateId,
    pub amount: Money,
    pub settled_total: Money,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditNoteEvent {
    Created(CreditNoteCreated),
    StatusChanged(StatusChange<CreditNoteStatus>),
    SettlementRecorded(SettlementRecorded),
}

impl Event for CreditNoteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CreditNoteEvent::Created(_) => "finance.credit_note.created",
            CreditNoteEvent::StatusChanged(_) => "finance.credit_note.status_changed",
            CreditNoteEvent::SettlementRecorded(_) => "finance.credit_note.settlement_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CreditNoteEvent::Created(e) => e.occurred_at,
            CreditNoteEvent::StatusChanged(e) => e.occurred_at,
            CreditNoteEvent::SettlementRecorded(e) => e.occurred_at,
        }
    }
}

impl LifecycleEvent for CreditNoteEvent {
    type Status = CreditNoteStatus;

    fn status_change(&self) -> Option<&StatusChange<CreditNoteStatus>> {
        match self {
            CreditNoteEvent::StatusChanged(change) => Some(change),
            _ => None,
        }
    }
}

impl Aggregate for CreditNote {
    type Command = CreditNoteCommand;
    type Event = CreditNoteEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CreditNoteEvent::Created(e) => {
                self.id = e.note_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.vendor_code = e.vendor_code.clone();
                self.vendor_return_id = e.vendor_return_id;
                self.amount = e.amount;
                self.settled = Money::ZERO;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.lifecycle = StatusTracker::new();
                self.created = true;
            }
            CreditNoteEvent::StatusChanged(change) => self.lifecycle.apply(change),
            CreditNoteEvent::SettlementRecorded(e) => {
                self.settled = e.settled_total;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CreditNoteCommand::Create(cmd) => self.handle_create(cmd),
            CreditNoteCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            CreditNoteCommand::RecordSettlement(cmd) => self.handle_settlement(cmd),
        }
    }
}

impl LifecycleAggregate for CreditNote {
    type Status = CreditNoteStatus;

    fn empty(id: AggregateId) -> Self {
        CreditNote::empty(id)
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn status_tracker(&self) -> &StatusTracker<CreditNoteStatus> {
        &self.lifecycle
    }

    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<CreditNoteStatus>,
    ) -> CreditNoteCommand {
        CreditNoteCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            entity_id: id,
            request,
        })
    }
}

impl CreditNote {
    fn ensure_target(&self, tenant_id: TenantId, note_id: AggregateId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != note_id {
            return Err(DomainError::invariant("note_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateCreditNote) -> Result<Vec<CreditNoteEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("credit note already exists"));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("credit note amount must be positive"));
        }
        if cmd.vendor_code.trim().is_empty() {
            return Err(DomainError::validation("vendor_code cannot be empty"));
        }

        Ok(vec![CreditNoteEvent::Created(CreditNoteCreated {
            tenant_id: cmd.tenant_id,
            note_id: cmd.note_id,
            reference: cmd.reference.trim().to_string(),
            vendor_code: cmd.vendor_code.trim().to_string(),
            vendor_return_id: cmd.vendor_return_id,
            amount: cmd.amount,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangeStatus<CreditNoteStatus>,
    ) -> Result<Vec<CreditNoteEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.entity_id)?;

        let Some(change) = self.lifecycle.decide(cmd.tenant_id, self.id, &cmd.request)? else {
            return Ok(vec![]);
        };

        if change.to == CreditNoteStatus::Settled && !self.outstanding().is_zero() {
            return Err(DomainError::validation(format!(
                "credit note still has {} outstanding",
                self.outstanding()
            )));
        }

        Ok(vec![CreditNoteEvent::StatusChanged(change)])
    }

    fn handle_settlement(&self, cmd: &RecordSettlement) -> Result<Vec<CreditNoteEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.note_id)?;

        if self.status() != CreditNoteStatus::Accepted {
            return Err(DomainError::invariant(format!(
                "settlements can only be recorded on accepted credit notes (status is '{}')",
                self.status()
            )));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("settlement amount must be positive"));
        }

        let settled_total = self.settled.checked_add(cmd.amount)?;
        if settled_total > self.amount {
            return Err(DomainError::validation(format!(
                "settlement of {} exceeds outstanding {}",
                cmd.amount,
                self.outstanding()
            )));
        }

        let mut events = vec![CreditNoteEvent::SettlementRecorded(SettlementRecorded {
            tenant_id: cmd.tenant_id,
            note_id: cmd.note_id,
            amount: cmd.amount,
            settled_total,
            recorded_by: cmd.actor.id(),
            occurred_at: cmd.occurred_at,
        })];

        if settled_total == self.amount {
            let request = TransitionRequest::new(CreditNoteStatus::Settled, cmd.actor.clone(), cmd.occurred_at)
                .with_reason("fully settled");
            if let Some(change) = self.lifecycle.decide(cmd.tenant_id, self.id, &request)? {
                events.push(CreditNoteEvent::StatusChanged(change));
            }
        }

        Ok(events)
    }
}
