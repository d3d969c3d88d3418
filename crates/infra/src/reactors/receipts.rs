use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use loomerp_core::Actor;
use loomerp_events::{variant_body, EventEnvelope};
use loomerp_purchasing::{GrnInspected, ReceivedLine, RecordReceipt, GRN_INSPECTED_EVENT};

use crate::command_dispatcher::DispatchError;
use crate::saga::executor::RECORD_RECEIPT;
use crate::saga::CommandExecutor;

/// Books inspected GRN quantities against the purchase order they were received on.
///
/// Only accepted quantity counts, capped at the ordered quantity of the GRN line, so an
/// excess delivery never over-receives the order. The order itself ignores a second
/// receipt for the same GRN.
pub struct ReceiptReactor<X> {
    executor: X,
}

impl<X: CommandExecutor> ReceiptReactor<X> {
    pub fn new(executor: X) -> Self {
        Self { executor }
    }

    pub fn receipt_for(inspected: &GrnInspected) -> RecordReceipt {
        let mut per_line: BTreeMap<u32, u32> = BTreeMap::new();
        for line in &inspected.lines {
            let accepted = line.accepted().min(line.ordered);
            if accepted > 0 {
                *per_line.entry(line.po_line_no).or_default() += accepted;
            }
        }

        RecordReceipt {
            tenant_id: inspected.tenant_id,
            order_id: inspected.purchase_order_id,
            grn_id: inspected.grn_id,
            lines: per_line
                .into_iter()
                .map(|(line_no, accepted)| ReceivedLine { line_no, accepted })
                .collect(),
            actor: Actor::system(),
            occurred_at: inspected.occurred_at,
        }
    }

    /// Returns true when a receipt was sent to the purchase order.
    pub fn handle(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, DispatchError> {
        if envelope.event_type() != GRN_INSPECTED_EVENT {
            return Ok(false);
        }
        let inspected: GrnInspected = variant_body(envelope.payload())
            .ok_or_else(|| DispatchError::Deserialize("GRN inspection payload is not a tagged event".to_string()))
            .and_then(|body| {
                serde_json::from_value(body.clone()).map_err(|e| DispatchError::Deserialize(e.to_string()))
            })?;

        let receipt = Self::receipt_for(&inspected);
        let payload = serde_json::to_value(&receipt).map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        self.executor.execute(
            inspected.tenant_id,
            "purchasing.order",
            inspected.purchase_order_id,
            RECORD_RECEIPT,
            &payload,
        )?;

        tracing::info!(
            tenant_id = %inspected.tenant_id,
            grn_id = %inspected.grn_id,
            order_id = %inspected.purchase_order_id,
            lines = receipt.lines.len(),
            "receipt recorded on purchase order"
        );
        Ok(true)
    }
}
