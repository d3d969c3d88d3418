//! Saga infrastructure: persistence and command execution.
//!
//! A saga's own events live in the event store under a deterministic stream id, so a
//! redelivered trigger sees the state left by the first delivery. Commands run before
//! the saga's events are appended; they target deterministic ids, so a retry after a
//! crash in between hits `Conflict` ("already created") and moves on.

pub mod executor;
pub mod grn_discrepancy;

use std::marker::PhantomData;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use loomerp_core::{AggregateId, ExpectedVersion, TenantId};
use loomerp_events::{EventEnvelope, Saga, SagaAction};

use crate::command_dispatcher::DispatchError;
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

pub use executor::DispatchingExecutor;
pub use grn_discrepancy::{GrnDiscrepancyEvent, GrnDiscrepancySaga, GrnDiscrepancyState};

/// Executes the commands sagas ask for.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        command_type: &str,
        payload: &JsonValue,
    ) -> Result<(), DispatchError>;
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error(transparent)]
    Store(#[from] EventStoreError),
    #[error("saga command {command_type} on {aggregate_type} failed: {source}")]
    Command {
        aggregate_type: String,
        command_type: String,
        #[source]
        source: DispatchError,
    },
    #[error("failed to deserialize saga event: {0}")]
    Deserialize(String),
}

/// What one delivery did to a saga instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaProgress {
    pub commands_executed: usize,
    pub commands_skipped: usize,
    pub events_appended: usize,
    pub completed: bool,
}

pub struct SagaRunner<G: Saga, E, X> {
    store: E,
    executor: X,
    _saga: PhantomData<G>,
}

impl<G, E, X> SagaRunner<G, E, X>
where
    G: Saga,
    E: EventStore,
    X: CommandExecutor,
{
    pub fn new(store: E, executor: X) -> Self {
        Self {
            store,
            executor,
            _saga: PhantomData,
        }
    }

    fn completed_event_type() -> String {
        format!("{}.completed", G::saga_type())
    }

    /// Rebuild the saga state from its stream.
    pub fn load_state(
        &self,
        tenant_id: TenantId,
        correlation: &G::CorrelationId,
    ) -> Result<(G::State, Vec<StoredEvent>), SagaError> {
        let saga_id = G::saga_id(tenant_id, correlation);
        let history = self.store.load_stream(tenant_id, saga_id)?;

        let completed = Self::completed_event_type();
        let mut state = G::initial_state(tenant_id, correlation);
        for stored in history.iter().filter(|e| e.event_type != completed) {
            let event: G::SagaEvent = serde_json::from_value(stored.payload.clone())
                .map_err(|e| SagaError::Deserialize(e.to_string()))?;
            G::apply(&mut state, &event);
        }
        Ok((state, history))
    }

    /// Route one committed envelope to its saga instance, if any.
    pub fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Result<SagaProgress, SagaError> {
        let Some(correlation) = G::correlate(envelope) else {
            return Ok(SagaProgress::default());
        };
        let tenant_id = envelope.tenant_id();
        let saga_id = G::saga_id(tenant_id, &correlation);

        let (state, history) = self.load_state(tenant_id, &correlation)?;
        let actions = G::react(&state, tenant_id, &correlation, envelope);
        if actions.is_empty() {
            return Ok(SagaProgress::default());
        }

        let mut progress = SagaProgress::default();
        let mut to_append = Vec::new();

        for action in actions {
            match action {
                SagaAction::Command {
                    aggregate_type,
                    aggregate_id,
                    command_type,
                    payload,
                } => match self
                    .executor
                    .execute(tenant_id, &aggregate_type, aggregate_id, &command_type, &payload)
                {
                    Ok(()) => {
                        tracing::info!(
                            saga = G::saga_type(),
                            tenant_id = %tenant_id,
                            aggregate_type = %aggregate_type,
                            aggregate_id = %aggregate_id,
                            command_type = %command_type,
                            "saga command executed"
                        );
                        progress.commands_executed += 1;
                    }
                    Err(DispatchError::Concurrency(reason)) => {
                        tracing::debug!(
                            saga = G::saga_type(),
                            aggregate_id = %aggregate_id,
                            reason = %reason,
                            "saga command already applied"
                        );
                        progress.commands_skipped += 1;
                    }
                    Err(source) => {
                        return Err(SagaError::Command {
                            aggregate_type,
                            command_type,
                            source,
                        })
                    }
                },
                SagaAction::Emit { event_type, payload } => to_append.push((event_type, payload)),
                SagaAction::Complete => {
                    progress.completed = true;
                    to_append.push((Self::completed_event_type(), JsonValue::Null));
                }
            }
        }

        let uncommitted: Vec<UncommittedEvent> = to_append
            .into_iter()
            .map(|(event_type, payload)| UncommittedEvent {
                event_id: Uuid::now_v7(),
                tenant_id,
                aggregate_id: saga_id,
                aggregate_type: G::saga_type().to_string(),
                event_type,
                event_version: 1,
                occurred_at: Utc::now(),
                payload,
            })
            .collect();

        match self
            .store
            .append(uncommitted, ExpectedVersion::Exact(history.len() as u64))
        {
            Ok(committed) => progress.events_appended = committed.len(),
            // A concurrent delivery of the same trigger already advanced the saga.
            Err(EventStoreError::Concurrency(_)) => {}
            Err(e) => return Err(e.into()),
        }

        Ok(progress)
    }
}
