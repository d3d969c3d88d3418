//! Projection cursors: the last processed sequence number per stream.
//!
//! Events at or below the cursor are duplicates and get skipped, which keeps
//! projections idempotent under at-least-once delivery. Clearing the cursors of a
//! tenant is the first step of a rebuild.

use std::collections::HashMap;
use std::sync::RwLock;

use loomerp_core::{AggregateId, TenantId};

pub trait ProjectionCursorStore: Send + Sync {
    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, projection: &str) -> Option<u64>;

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, projection: &str, sequence_number: u64);

    fn clear_cursors(&self, tenant_id: TenantId, projection: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    projection: String,
}

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, projection: &str) -> Option<u64> {
        let cursors = self.cursors.read().ok()?;
        cursors
            .get(&CursorKey {
                tenant_id,
                aggregate_id,
                projection: projection.to_string(),
            })
            .copied()
    }

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, projection: &str, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                    projection: projection.to_string(),
                },
                sequence_number,
            );
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId, projection: &str) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| !(k.tenant_id == tenant_id && k.projection == projection));
        }
    }
}
