use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loomerp_core::lifecycle::{ChangeStatus, StatusChange, StatusLifecycle, StatusTracker, Transition};
use loomerp_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LifecycleAggregate, TenantId,
    TransitionRequest, UserId,
};
use loomerp_events::{Event, LifecycleEvent};

use crate::money::Money;

const DEBIT_NOTE_TRANSITIONS: &[Transition<DebitNoteStatus>] = {
    use DebitNoteStatus::*;
    &[
        Transition::new(Raised, Sent, "finance.debit_notes.send"),
        Transition::new(Raised, Cancelled, "finance.debit_notes.cancel"),
        Transition::new(Sent, Adjusted, "finance.debit_notes.adjust"),
    ]
};

pub static DEBIT_NOTE_LIFECYCLE: StatusLifecycle<DebitNoteStatus> = StatusLifecycle::new(
    "finance.debit_note",
    DebitNoteStatus::Raised,
    DEBIT_NOTE_TRANSITIONS,
);

loomerp_core::lifecycle_status! {
    /// Debit note status lifecycle.
    pub enum DebitNoteStatus: DEBIT_NOTE_LIFECYCLE {
        Raised = "raised",
        Sent = "sent",
        Adjusted = "adjusted",
        Cancelled = "cancelled",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitNoteLine {
    pub material_code: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl DebitNoteLine {
    pub fn amount(&self) -> Result<Money, DomainError> {
        self.unit_price.times(self.quantity)
    }
}

/// Aggregate root: DebitNote (buyer claims value back from a vendor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebitNote {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    reference: String,
    vendor_code: String,
    grn_id: Option<AggregateId>,
    lines: Vec<DebitNoteLine>,
    amount: Money,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    lifecycle: StatusTracker<DebitNoteStatus>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl DebitNote {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            vendor_code: String::new(),
            grn_id: None,
            lines: Vec::new(),
            amount: Money::ZERO,
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

    pub fn grn_id(&self) -> Option<AggregateId> {
        self.grn_id
    }

    pub fn lines(&self) -> &[DebitNoteLine] {
        &self.lines
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> DebitNoteStatus {
        self.lifecycle.status()
    }
}

impl AggregateRoot for DebitNote {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateDebitNote. `grn_id` is set when raised from a receipt shortage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDebitNote {
    pub tenant_id: TenantId,
    pub note_id: AggregateId,
    pub reference: String,
    pub vendor_code: String,
    pub grn_id: Option<AggregateId>,
    pub lines: Vec<DebitNoteLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebitNoteCommand {
    Create(CreateDebitNote),
    ChangeStatus(ChangeStatus<DebitNoteStatus>),
}

/// Event: DebitNoteCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitNoteCreated {
    pub tenant_id: TenantId,
    pub note_id: AggregateId,
    pub reference: String,
    pub vendor_code: String,
    pub grn_id: Option<AggregateId>,
    pub lines: Vec<DebitNoteLine>,
    pub amount: Money,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebitNoteEvent {
    Created(DebitNoteCreated),
    StatusChanged(StatusChange<DebitNoteStatus>),
}

impl Event for DebitNoteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DebitNoteEvent::Created(_) => "finance.debit_note.created",
            DebitNoteEvent::StatusChanged(_) => "finance.debit_note.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DebitNoteEvent::Created(e) => e.occurred_at,
            DebitNoteEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl LifecycleEvent for DebitNoteEvent {
    type Status = DebitNoteStatus;

    fn status_change(&self) -> Option<&StatusChange<DebitNoteStatus>> {
        match self {
            DebitNoteEvent::StatusChanged(change) => Some(change),
            _ => None,
        }
    }
}

impl Aggregate for DebitNote {
    type Command = DebitNoteCommand;
    type Event = DebitNoteEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DebitNoteEvent::Created(e) => {
                self.id = e.note_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.vendor_code = e.vendor_code.clone();
                self.grn_id = e.grn_id;
                self.lines = e.lines.clone();
                self.amount = e.amount;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.lifecycle = StatusTracker::new();
                self.created = true;
            }
            DebitNoteEvent::StatusChanged(change) => self.lifecycle.apply(change),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DebitNoteCommand::Create(cmd) => self.handle_create(cmd),
            DebitNoteCommand::ChangeStatus(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found());
                }
                if self.tenant_id != Some(cmd.tenant_id) || self.id != cmd.entity_id {
                    return Err(DomainError::invariant("tenant or note_id mismatch"));
                }
                Ok(self
                    .lifecycle
                    .decide(cmd.tenant_id, self.id, &cmd.request)?
                    .map(DebitNoteEvent::StatusChanged)
                    .into_iter()
                    .collect())
            }
        }
    }
}

impl LifecycleAggregate for DebitNote {
    type Status = DebitNoteStatus;

    fn empty(id: AggregateId) -> Self {
        DebitNote::empty(id)
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn status_tracker(&self) -> &StatusTracker<DebitNoteStatus> {
        &self.lifecycle
    }

    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<DebitNoteStatus>,
    ) -> DebitNoteCommand {
        DebitNoteCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            entity_id: id,
            request,
        })
    }
}

impl DebitNote {
    fn handle_create(&self, cmd: &CreateDebitNote) -> Result<Vec<DebitNoteEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("debit note already exists"));
        }
        if cmd.vendor_code.trim().is_empty() {
            return Err(DomainError::validation("vendor_code cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("a debit note needs at least one line"));
        }
        if cmd.lines.iter().any(|l| l.quantity == 0) {
            return Err(DomainError::validation("debit note quantities must be positive"));
        }

        let amount = Money::sum(
            cmd.lines
                .iter()
                .map(DebitNoteLine::amount)
                .collect::<Result<Vec<_>, _>>()?,
        )?;
        if amount.is_zero() {
            return Err(DomainError::validation("debit note amount must be positive"));
        }

        Ok(vec![DebitNoteEvent::Created(DebitNoteCreated {
            tenant_id: cmd.tenant_id,
            note_id: cmd.note_id,
            reference: cmd.reference.trim().to_string(),
            vendor_code: cmd.vendor_code.trim().to_string(),
            grn_id: cmd.grn_id,
            lines: cmd.lines.clone(),
            amount,
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

    fn create(tenant_id: TenantId, note_id: AggregateId, lines: Vec<DebitNoteLine>) -> DebitNoteCommand {
        DebitNoteCommand::Create(CreateDebitNote {
            tenant_id,
            note_id,
            reference: "DN-GRN-0091".to_string(),
            vendor_code: "V-YARN".to_string(),
            grn_id: Some(AggregateId::new()),
            lines,
            created_by: UserId::system(),
            occurred_at: Utc::now(),
        })
    }

    fn line(quantity: u32, unit_price: u64) -> DebitNoteLine {
        DebitNoteLine {
            material_code: "YRN-30S".to_string(),
            quantity,
            unit_price: Money::from_minor(unit_price),
        }
    }

    #[test]
    fn amount_is_the_sum_of_line_values() {
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let mut note = DebitNote::empty(id);

        execute(&mut note, &create(tenant_id, id, vec![line(20, 450), line(3, 1_000)])).unwrap();

        assert_eq!(note.amount(), Money::from_minor(12_000));
        assert_eq!(note.status(), DebitNoteStatus::Raised);
    }

    #[test]
    fn lines_are_required() {
        let id = AggregateId::new();
        let err = DebitNote::empty(id)
            .handle(&create(TenantId::new(), id, vec![]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn adjusted_is_reachable_only_after_sending() {
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let mut note = DebitNote::empty(id);
        execute(&mut note, &create(tenant_id, id, vec![line(1, 100)])).unwrap();

        let adjust = DebitNote::transition_command(
            tenant_id,
            id,
            TransitionRequest::new(DebitNoteStatus::Adjusted, Actor::system(), Utc::now()),
        );
        assert!(matches!(
            execute(&mut note, &adjust),
            Err(DomainError::InvalidTransition { .. })
        ));

        let send = DebitNote::transition_command(
            tenant_id,
            id,
            TransitionRequest::new(DebitNoteStatus::Sent, Actor::system(), Utc::now()),
        );
        execute(&mut note, &send).unwrap();
        execute(&mut note, &adjust).unwrap();
        assert!(note.status_tracker().is_terminal());
    }
}
