use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loomerp_core::lifecycle::{ChangeStatus, StatusChange, StatusLifecycle, StatusTracker, Transition};
use loomerp_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LifecycleAggregate, TenantId,
    TransitionRequest, UserId,
};
use loomerp_events::{Event, LifecycleEvent};

const SHIPMENT_TRANSITIONS: &[Transition<ShipmentStatus>] = {
    use ShipmentStatus::*;
    &[
        Transition::new(Planned, Packed, "shipping.shipments.pack"),
        Transition::new(Planned, Cancelled, "shipping.shipments.cancel"),
        Transition::new(Packed, Cancelled, "shipping.shipments.cancel"),
        Transition::new(Packed, Dispatched, "shipping.shipments.dispatch"),
        Transition::new(Dispatched, InTransit, "shipping.shipments.track"),
        Transition::new(Dispatched, Delivered, "shipping.shipments.deliver"),
        Transition::new(InTransit, Delivered, "shipping.shipments.deliver"),
        Transition::new(Delivered, Returned, "shipping.shipments.return"),
    ]
};

pub static SHIPMENT_LIFECYCLE: StatusLifecycle<ShipmentStatus> =
    StatusLifecycle::new("shipping.shipment", ShipmentStatus::Planned, SHIPMENT_TRANSITIONS);

loomerp_core::lifecycle_status! {
    /// Shipment status lifecycle.
    pub enum ShipmentStatus: SHIPMENT_LIFECYCLE {
        Planned = "planned",
        Packed = "packed",
        Dispatched = "dispatched",
        InTransit = "in_transit",
        Delivered = "delivered",
        Returned = "returned",
        Cancelled = "cancelled",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    pub name: String,
    pub tracking_number: String,
}

/// Aggregate root: Shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shipment {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    reference: String,
    customer_code: String,
    sales_order_ref: Option<String>,
    cartons: u32,
    carrier: Option<Carrier>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    lifecycle: StatusTracker<ShipmentStatus>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl Shipment {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            customer_code: String::new(),
            sales_order_ref: None,
            cartons: 0,
            carrier: None,
            created_by: None,
            created_at: None,
            lifecycle: StatusTracker::new(),
            version: 0,
            created: false,
        }
    }

    pub fn customer_code(&self) -> &str {
        &self.customer_code
    }

    pub fn carrier(&self) -> Option<&Carrier> {
        self.carrier.as_ref()
    }

    pub fn status(&self) -> ShipmentStatus {
        self.lifecycle.status()
    }
}

impl AggregateRoot for Shipment {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShipment {
    pub tenant_id: TenantId,
    pub shipment_id: AggregateId,
    pub reference: String,
    pub customer_code: String,
    pub sales_order_ref: Option<String>,
    pub cartons: u32,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignCarrier (planned/packed only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignCarrier {
    pub tenant_id: TenantId,
    pub shipment_id: AggregateId,
    pub carrier: String,
    pub tracking_number: String,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    Create(CreateShipment),
    AssignCarrier(AssignCarrier),
    ChangeStatus(ChangeStatus<ShipmentStatus>),
}

/// Event: ShipmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCreated {
    pub tenant_id: TenantId,
    pub shipment_id: AggregateId,
    pub reference: String,
    pub customer_code: String,
    pub sales_order_ref: Option<String>,
    pub cartons: u32,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CarrierAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierAssigned {
    pub tenant_id: TenantId,
    pub shipment_id: AggregateId,
    pub carrier: String,
    pub tracking_number: String,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentEvent {
    Created(ShipmentCreated),
    CarrierAssigned(CarrierAssigned),
    StatusChanged(StatusChange<ShipmentStatus>),
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::Created(_) => "shipping.shipment.created",
            ShipmentEvent::CarrierAssigned(_) => "shipping.shipment.carrier_assigned",
            ShipmentEvent::StatusChanged(_) => "shipping.shipment.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::Created(e) => e.occurred_at,
            ShipmentEvent::CarrierAssigned(e) => e.occurred_at,
            ShipmentEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl LifecycleEvent for ShipmentEvent {
    type Status = ShipmentStatus;

    fn status_change(&self) -> Option<&StatusChange<ShipmentStatus>> {
        match self {
            ShipmentEvent::StatusChanged(change) => Some(change),
            _ => None,
        }
    }
}

impl Aggregate for Shipment {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShipmentEvent::Created(e) => {
                self.id = e.shipment_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.customer_code = e.customer_code.clone();
                self.sales_order_ref = e.sales_order_ref.clone();
                self.cartons = e.cartons;
                self.carrier = None;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.lifecycle = StatusTracker::new();
                self.created = true;
            }
            ShipmentEvent::CarrierAssigned(e) => {
                self.carrier = Some(Carrier {
                    name: e.carrier.clone(),
                    tracking_number: e.tracking_number.clone(),
                });
            }
            ShipmentEvent::StatusChanged(change) => self.lifecycle.apply(change),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::Create(cmd) => self.handle_create(cmd),
            ShipmentCommand::AssignCarrier(cmd) => self.handle_assign_carrier(cmd),
            ShipmentCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl LifecycleAggregate for Shipment {
    type Status = ShipmentStatus;

    fn empty(id: AggregateId) -> Self {
        Shipment::empty(id)
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn status_tracker(&self) -> &StatusTracker<ShipmentStatus> {
        &self.lifecycle
    }

    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<ShipmentStatus>,
    ) -> ShipmentCommand {
        ShipmentCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            entity_id: id,
            request,
        })
    }
}

impl Shipment {
    fn ensure_target(&self, tenant_id: TenantId, shipment_id: AggregateId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != shipment_id {
            return Err(DomainError::invariant("shipment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("shipment already exists"));
        }
        if cmd.customer_code.trim().is_empty() {
            return Err(DomainError::validation("customer_code cannot be empty"));
        }
        if cmd.cartons == 0 {
            return Err(DomainError::validation("a shipment needs at least one carton"));
        }

        Ok(vec![ShipmentEvent::Created(ShipmentCreated {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            reference: cmd.reference.trim().to_string(),
            customer_code: cmd.customer_code.trim().to_string(),
            sales_order_ref: cmd.sales_order_ref.clone(),
            cartons: cmd.cartons,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_carrier(&self, cmd: &AssignCarrier) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.shipment_id)?;

        if !matches!(self.status(), ShipmentStatus::Planned | ShipmentStatus::Packed) {
            return Err(DomainError::invariant(format!(
                "carrier cannot be changed once the shipment is '{}'",
                self.status()
            )));
        }
        if cmd.carrier.trim().is_empty() || cmd.tracking_number.trim().is_empty() {
            return Err(DomainError::validation("carrier and tracking_number are required"));
        }

        Ok(vec![ShipmentEvent::CarrierAssigned(CarrierAssigned {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            carrier: cmd.carrier.trim().to_string(),
            tracking_number: cmd.tracking_number.trim().to_string(),
            assigned_by: cmd.assigned_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus<ShipmentStatus>) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.entity_id)?;

        let Some(change) = self.lifecycle.decide(cmd.tenant_id, self.id, &cmd.request)? else {
            return Ok(vec![]);
        };

        if change.to == ShipmentStatus::Dispatched && self.carrier.is_none() {
            return Err(DomainError::validation(
                "assign a carrier and tracking number before dispatch",
            ));
        }

        Ok(vec![ShipmentEvent::StatusChanged(change)])
    }
}
