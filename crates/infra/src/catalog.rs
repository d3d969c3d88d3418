//! Registry of every lifecycle-managed document type.
//!
//! Consumers that handle many entity types through serialized events (status board,
//! notifications, `/lifecycles/:entity`) look tables up here by aggregate type.

use loomerp_core::LifecycleTable;
use loomerp_finance::{CREDIT_NOTE_LIFECYCLE, DEBIT_NOTE_LIFECYCLE};
use loomerp_inventory::{MATERIAL_REQUEST_LIFECYCLE, MATERIAL_RETURN_LIFECYCLE};
use loomerp_purchasing::{GRN_LIFECYCLE, PURCHASE_ORDER_LIFECYCLE, VENDOR_RETURN_LIFECYCLE};
use loomerp_shipping::SHIPMENT_LIFECYCLE;

/// Aggregate types with a status lifecycle, in workflow order.
pub const ENTITIES: [&str; 8] = [
    "purchasing.order",
    "purchasing.grn",
    "purchasing.vendor_return",
    "finance.credit_note",
    "finance.debit_note",
    "inventory.material_request",
    "inventory.material_return",
    "shipping.shipment",
];

/// Transition table for an aggregate type.
pub fn lifecycle(entity: &str) -> Option<LifecycleTable> {
    let table = match entity {
        "purchasing.order" => PURCHASE_ORDER_LIFECYCLE.describe(),
        "purchasing.grn" => GRN_LIFECYCLE.describe(),
        "purchasing.vendor_return" => VENDOR_RETURN_LIFECYCLE.describe(),
        "finance.credit_note" => CREDIT_NOTE_LIFECYCLE.describe(),
        "finance.debit_note" => DEBIT_NOTE_LIFECYCLE.describe(),
        "inventory.material_request" => MATERIAL_REQUEST_LIFECYCLE.describe(),
        "inventory.material_return" => MATERIAL_RETURN_LIFECYCLE.describe(),
        "shipping.shipment" => SHIPMENT_LIFECYCLE.describe(),
        _ => return None,
    };
    Some(table)
}

pub fn lifecycles() -> Vec<LifecycleTable> {
    ENTITIES.iter().filter_map(|e| lifecycle(e)).collect()
}

pub fn initial_status(entity: &str) -> Option<&'static str> {
    lifecycle(entity).map(|t| t.initial)
}

pub fn is_lifecycle_entity(entity: &str) -> bool {
    ENTITIES.contains(&entity)
}
