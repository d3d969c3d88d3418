use chrono::{DateTime, Utc};

use loomerp_core::lifecycle::{LifecycleStatus, StatusChange};

/// A domain event.
///
/// Events are immutable facts, versioned for schema evolution, and append-only.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "purchasing.order.status_changed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// An event stream whose aggregate follows a status lifecycle.
pub trait LifecycleEvent: Event {
    type Status: LifecycleStatus;

    /// The status change carried by this event, if it is one.
    fn status_change(&self) -> Option<&StatusChange<Self::Status>>;
}
