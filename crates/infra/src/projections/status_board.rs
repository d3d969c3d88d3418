//! Status board: one row per lifecycle document with its current status.
//!
//! Built purely from serialized envelopes, so a single projection serves every
//! document type. Streams that are not lifecycle documents (saga bookkeeping) are
//! ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use loomerp_core::{AggregateId, StatusStamp, TenantId, UserId};
use loomerp_events::{created_body, status_change, variant_body, EventEnvelope};

use crate::catalog;
use crate::event_store::{EventStore, EventStoreError};
use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::TenantStore;

pub const STATUS_BOARD_PROJECTION: &str = "status_board";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub reference: Option<String>,
    pub status: String,
    pub version: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_actor: Option<UserId>,
    pub history: Vec<StatusStamp<String>>,
}

impl StatusRecord {
    fn new(aggregate_type: &str, aggregate_id: AggregateId, status: &str, at: DateTime<Utc>) -> Self {
        Self {
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            reference: None,
            status: status.to_string(),
            version: 0,
            created_at: None,
            updated_at: at,
            last_actor: None,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StatusBoardError {
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("status board lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

pub struct StatusBoardProjection<S, C = InMemoryCursorStore> {
    store: S,
    cursors: Arc<C>,
}

impl<S> StatusBoardProjection<S>
where
    S: TenantStore<AggregateId, StatusRecord>,
{
    pub fn new(store: S) -> Self {
        Self::with_cursor_store(store, Arc::new(InMemoryCursorStore::new()))
    }
}

impl<S, C> StatusBoardProjection<S, C>
where
    S: TenantStore<AggregateId, StatusRecord>,
    C: ProjectionCursorStore,
{
    pub fn with_cursor_store(store: S, cursors: Arc<C>) -> Self {
        Self { store, cursors }
    }

    pub fn get(&self, tenant_id: TenantId, aggregate_id: &AggregateId) -> Option<StatusRecord> {
        self.store.get(tenant_id, aggregate_id)
    }

    /// Documents of one type, optionally filtered by status, newest first.
    pub fn list(&self, tenant_id: TenantId, aggregate_type: &str, status: Option<&str>) -> Vec<StatusRecord> {
        let mut records: Vec<StatusRecord> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|r| r.aggregate_type == aggregate_type)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.aggregate_id.cmp(&b.aggregate_id)));
        records
    }

    /// Fold one envelope into the board. Returns the updated record, or `None` for
    /// duplicates and streams the board does not track.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<Option<StatusRecord>, StatusBoardError> {
        let aggregate_type = envelope.aggregate_type();
        let Some(initial) = catalog::initial_status(aggregate_type) else {
            return Ok(None);
        };

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self
            .cursors
            .get_cursor(tenant_id, aggregate_id, STATUS_BOARD_PROJECTION)
            .unwrap_or(0);
        if seq == 0 {
            return Err(StatusBoardError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(None);
        }
        if last != 0 && seq != last + 1 {
            return Err(StatusBoardError::NonMonotonicSequence { last, found: seq });
        }

        let at = variant_body(envelope.payload())
            .and_then(|body| body.get("occurred_at"))
            .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
            .unwrap_or_else(Utc::now);

        let mut record = self
            .store
            .get(tenant_id, &aggregate_id)
            .unwrap_or_else(|| StatusRecord::new(aggregate_type, aggregate_id, initial, at));

        if let Some(body) = created_body(envelope) {
            record.reference = body.get("reference").and_then(JsonValue::as_str).map(str::to_string);
            record.status = initial.to_string();
            record.created_at = Some(at);
        }

        if let Some(change) = status_change(envelope) {
            if change.tenant_id != tenant_id {
                return Err(StatusBoardError::TenantIsolation(
                    "status change tenant_id does not match envelope tenant_id".to_string(),
                ));
            }
            record.status = change.to.clone();
            record.last_actor = Some(change.actor);
            record.history.push(StatusStamp {
                from: change.from,
                to: change.to,
                actor: change.actor,
                reason: change.reason,
                at: change.occurred_at,
            });
        }

        record.version = seq;
        record.updated_at = at;

        self.store.upsert(tenant_id, aggregate_id, record.clone());
        self.cursors
            .update_cursor(tenant_id, aggregate_id, STATUS_BOARD_PROJECTION, seq);

        Ok(Some(record))
    }

    /// Drop the tenant's board and replay every stored event.
    pub fn rebuild<E: EventStore + ?Sized>(&self, tenant_id: TenantId, events: &E) -> Result<usize, StatusBoardError> {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_cursors(tenant_id, STATUS_BOARD_PROJECTION);

        let mut applied = 0;
        for stored in events.load_tenant(tenant_id)? {
            if self.apply_envelope(&stored.to_envelope())?.is_some() {
                applied += 1;
            }
        }

        tracing::info!(tenant_id = %tenant_id, applied, "status board rebuilt");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryTenantStore;
    use serde_json::json;
    use uuid::Uuid;

    fn board() -> StatusBoardProjection<Arc<InMemoryTenantStore<AggregateId, StatusRecord>>> {
        StatusBoardProjection::new(Arc::new(InMemoryTenantStore::new()))
    }

    fn created(t: TenantId, a: AggregateId) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            t,
            a,
            "purchasing.order",
            1,
            "purchasing.order.created",
            json!({ "Created": { "reference": "PO-2024-117", "occurred_at": "2024-03-01T09:00:00Z" } }),
        )
    }

    fn submitted(t: TenantId, a: AggregateId, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            t,
            a,
            "purchasing.order",
            seq,
            "purchasing.order.status_changed",
            json!({ "StatusChanged": {
                "tenant_id": t, "entity_id": a, "from": "draft", "to": "pending_approval",
                "actor": UserId::new(), "reason": null, "request_id": null,
                "occurred_at": "2024-03-01T10:00:00Z"
            } }),
        )
    }

    #[test]
    fn tracks_status_and_history_per_document() {
        let board = board();
        let (t, a) = (TenantId::new(), AggregateId::new());

        board.apply_envelope(&created(t, a)).unwrap();
        let record = board.apply_envelope(&submitted(t, a, 2)).unwrap().unwrap();

        assert_eq!(record.reference.as_deref(), Some("PO-2024-117"));
        assert_eq!(record.status, "pending_approval");
        assert_eq!(record.version, 2);
        assert_eq!(record.history.len(), 1);
        assert_eq!(board.list(t, "purchasing.order", Some("pending_approval")).len(), 1);
        assert!(board.list(t, "purchasing.order", Some("draft")).is_empty());
    }

    #[test]
    fn duplicate_deliveries_are_skipped() {
        let board = board();
        let (t, a) = (TenantId::new(), AggregateId::new());
        let change = submitted(t, a, 2);

        board.apply_envelope(&created(t, a)).unwrap();
        board.apply_envelope(&change).unwrap();
        assert!(board.apply_envelope(&change).unwrap().is_none());
        assert_eq!(board.get(t, &a).unwrap().history.len(), 1);
    }

    #[test]
    fn gaps_are_rejected_and_saga_streams_ignored() {
        let board = board();
        let (t, a) = (TenantId::new(), AggregateId::new());
        board.apply_envelope(&created(t, a)).unwrap();

        let err = board.apply_envelope(&submitted(t, a, 3)).unwrap_err();
        assert!(matches!(err, StatusBoardError::NonMonotonicSequence { last: 1, found: 3 }));

        let saga = EventEnvelope::new(
            Uuid::now_v7(),
            t,
            AggregateId::new(),
            "saga.grn_discrepancy",
            1,
            "saga.grn_discrepancy.raised",
            json!({}),
        );
        assert!(board.apply_envelope(&saga).unwrap().is_none());
    }
}
