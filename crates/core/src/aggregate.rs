//! Aggregate root traits for event-sourced domain models.

use crate::error::{DomainError, DomainResult};
use crate::id::{AggregateId, TenantId};
use crate::lifecycle::{LifecycleStatus, StatusTracker, TransitionRequest};

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// For event-sourced aggregates this is the number of events applied, which
    /// equals the stream revision.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (saga bookkeeping, migrations).
    Any,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

impl From<Option<u64>> for ExpectedVersion {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(v) => ExpectedVersion::Exact(v),
            None => ExpectedVersion::Any,
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects. Follow-up work (notifications,
/// derived documents) is driven by the events they return.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version per event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// Returning an empty vector means "accepted, nothing to do" (idempotent replay).
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// An aggregate whose status follows a static lifecycle table.
///
/// Lets generic infrastructure (transition endpoint, status board, workflow service)
/// drive any document type the same way.
pub trait LifecycleAggregate:
    Aggregate<Error = DomainError> + AggregateRoot<Id = AggregateId> + Send + Sync + 'static
{
    type Status: LifecycleStatus;

    /// Fresh, not-yet-created instance used for rehydration.
    fn empty(id: AggregateId) -> Self;

    /// Whether a creation event has been applied.
    fn exists(&self) -> bool;

    fn tenant_id(&self) -> Option<TenantId>;

    fn status_tracker(&self) -> &StatusTracker<Self::Status>;

    /// Wrap a transition request into this aggregate's command type.
    fn transition_command(
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<Self::Status>,
    ) -> Self::Command;

    /// Stream type name, shared with the lifecycle table.
    fn aggregate_type() -> &'static str {
        Self::Status::lifecycle().entity()
    }

    fn status(&self) -> Self::Status {
        self.status_tracker().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_rejects_stale_writers() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        assert!(matches!(
            ExpectedVersion::Exact(2).check(3),
            Err(DomainError::Conflict(_))
        ));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn optional_version_maps_to_expectation() {
        assert_eq!(ExpectedVersion::from(Some(7)), ExpectedVersion::Exact(7));
        assert_eq!(ExpectedVersion::from(None), ExpectedVersion::Any);
    }
}
