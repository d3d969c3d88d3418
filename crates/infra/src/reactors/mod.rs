//! Reactors: side effects of committed events that are not part of any aggregate.
//!
//! Every reactor tolerates duplicate deliveries. Receipts are idempotent per GRN id
//! inside the purchase order, notifications are deduplicated by source event id.

pub mod notifications;
pub mod receipts;

pub use notifications::{
    Department, DepartmentNotification, InMemoryNotificationSink, NotificationReactor,
    NotificationRoute, NotificationRouter, NotificationSink,
};
pub use receipts::ReceiptReactor;
