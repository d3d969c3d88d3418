//! Status transition entry point shared by every lifecycle document.
//!
//! `apply_transition` runs the request through the aggregate's decision function
//! (table check, permission check, entity guards), persists the resulting status
//! change and publishes it, so receipts, derived documents and notifications react to
//! it. A rejected request leaves the stream untouched.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use loomerp_core::{Actor, AggregateId, AggregateRoot, LifecycleAggregate, LifecycleStatus, TenantId, TransitionRequest};
use loomerp_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

#[derive(Debug, Clone)]
pub struct TransitionOutcome<A> {
    pub aggregate: A,
    /// False when the request id had already been applied.
    pub changed: bool,
    pub version: u64,
}

pub struct WorkflowService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for WorkflowService<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<S, B> WorkflowService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Move `id` to `request.target` if its lifecycle and the actor's grants allow it.
    pub fn apply_transition<A>(
        &self,
        tenant_id: TenantId,
        id: AggregateId,
        request: TransitionRequest<A::Status>,
        expected_version: Option<u64>,
    ) -> Result<TransitionOutcome<A>, DispatchError>
    where
        A: LifecycleAggregate,
        A::Event: loomerp_events::Event + Serialize + DeserializeOwned,
    {
        let command = A::transition_command(tenant_id, id, request);
        let dispatched = self
            .dispatcher
            .execute::<A>(tenant_id, id, command, expected_version)?;

        let version = dispatched.aggregate.version();
        Ok(TransitionOutcome {
            changed: !dispatched.committed.is_empty(),
            version,
            aggregate: dispatched.aggregate,
        })
    }

    /// Convenience for a transition performed now, without reason or idempotency key.
    pub fn transition_now<A>(
        &self,
        tenant_id: TenantId,
        id: AggregateId,
        target: A::Status,
        actor: Actor,
    ) -> Result<TransitionOutcome<A>, DispatchError>
    where
        A: LifecycleAggregate,
        A::Event: loomerp_events::Event + Serialize + DeserializeOwned,
    {
        self.apply_transition::<A>(tenant_id, id, TransitionRequest::new(target, actor, Utc::now()), None)
    }

    /// Statuses the actor could move the document to from where it stands now.
    pub fn allowed_targets<A>(
        &self,
        tenant_id: TenantId,
        id: AggregateId,
        actor: &Actor,
    ) -> Result<Vec<A::Status>, DispatchError>
    where
        A: LifecycleAggregate,
        A::Event: DeserializeOwned,
    {
        let aggregate = self.dispatcher.load_existing::<A>(tenant_id, id)?;
        Ok(<A::Status as LifecycleStatus>::lifecycle().allowed_targets_for(aggregate.status(), actor))
    }
}
