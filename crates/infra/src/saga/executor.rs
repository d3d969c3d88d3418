use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use loomerp_core::{AggregateId, TenantId};
use loomerp_events::{EventBus, EventEnvelope};
use loomerp_finance::{CreateDebitNote, DebitNote, DebitNoteCommand};
use loomerp_purchasing::{
    CreateVendorReturn, PurchaseOrder, PurchaseOrderCommand, RecordReceipt, VendorReturn, VendorReturnCommand,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::saga::CommandExecutor;

pub const CREATE: &str = "create";
pub const RECORD_RECEIPT: &str = "record_receipt";

/// Executes saga commands through the command dispatcher.
pub struct DispatchingExecutor<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> DispatchingExecutor<S, B> {
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }
}

fn decode<T: DeserializeOwned>(command_type: &str, payload: &JsonValue) -> Result<T, DispatchError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| DispatchError::Validation(format!("malformed {command_type} payload: {e}")))
}

impl<S, B> CommandExecutor for DispatchingExecutor<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn execute(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        command_type: &str,
        payload: &JsonValue,
    ) -> Result<(), DispatchError> {
        match (aggregate_type, command_type) {
            ("purchasing.vendor_return", CREATE) => {
                let cmd: CreateVendorReturn = decode(command_type, payload)?;
                self.dispatcher
                    .execute::<VendorReturn>(tenant_id, aggregate_id, VendorReturnCommand::Create(cmd), None)?;
            }
            ("finance.debit_note", CREATE) => {
                let cmd: CreateDebitNote = decode(command_type, payload)?;
                self.dispatcher
                    .execute::<DebitNote>(tenant_id, aggregate_id, DebitNoteCommand::Create(cmd), None)?;
            }
            ("purchasing.order", RECORD_RECEIPT) => {
                let cmd: RecordReceipt = decode(command_type, payload)?;
                self.dispatcher.execute::<PurchaseOrder>(
                    tenant_id,
                    aggregate_id,
                    PurchaseOrderCommand::RecordReceipt(cmd),
                    None,
                )?;
            }
            _ => {
                return Err(DispatchError::Validation(format!(
                    "no saga command '{command_type}' for '{aggregate_type}'"
                )))
            }
        }
        Ok(())
    }
}
