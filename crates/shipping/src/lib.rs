//! Outbound shipments (event-sourced).
//!
//! Business rules for customer shipments, implemented purely as deterministic domain
//! logic (no IO, no HTTP, no storage).

pub mod shipment;

pub use shipment::{
    AssignCarrier, Carrier, CarrierAssigned, CreateShipment, Shipment, ShipmentCommand, ShipmentCreated,
    ShipmentEvent, ShipmentStatus, SHIPMENT_LIFECYCLE,
};
