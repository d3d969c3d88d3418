//! GRN discrepancy process.
//!
//! Triggered by a GRN inspection outcome:
//! - `shortage` → a vendor return for every discrepant line, plus a debit note valued
//!   at short quantity × PO unit price
//! - `excess` → a vendor return for the surplus
//! - `accepted` → nothing to raise
//!
//! Actions are only produced from `Waiting`, and the derived documents' ids are
//! UUIDv5s of the GRN id, so no redelivery can raise a second return or note.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use loomerp_core::{AggregateId, TenantId, UserId};
use loomerp_events::{variant_body, EventEnvelope, Saga, SagaAction};
use loomerp_finance::{CreateDebitNote, DebitNoteLine};
use loomerp_purchasing::{
    CreateVendorReturn, DiscrepancyKind, GrnInspected, GrnStatus, ReturnSource, VendorReturnLine,
    GRN_INSPECTED_EVENT,
};

use crate::saga::executor::CREATE;

pub const SAGA_TYPE: &str = "saga.grn_discrepancy";
pub const RAISED_EVENT: &str = "saga.grn_discrepancy.raised";
pub const NOTHING_TO_RAISE_EVENT: &str = "saga.grn_discrepancy.nothing_to_raise";

/// Id of the vendor return raised for a GRN.
pub fn vendor_return_id(grn_id: AggregateId) -> AggregateId {
    AggregateId::derived(grn_id, "vendor_return")
}

/// Id of the debit note raised for a GRN shortage.
pub fn debit_note_id(grn_id: AggregateId) -> AggregateId {
    AggregateId::derived(grn_id, "debit_note")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GrnDiscrepancyState {
    #[default]
    Waiting,
    Raised {
        vendor_return_id: AggregateId,
        debit_note_id: Option<AggregateId>,
    },
    NothingToRaise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GrnDiscrepancyEvent {
    DocumentsRaised {
        grn_id: AggregateId,
        outcome: GrnStatus,
        vendor_return_id: AggregateId,
        debit_note_id: Option<AggregateId>,
    },
    NoDiscrepancy {
        grn_id: AggregateId,
    },
}

pub struct GrnDiscrepancySaga;

impl GrnDiscrepancySaga {
    fn inspected(envelope: &EventEnvelope<JsonValue>) -> Option<GrnInspected> {
        let body = variant_body(envelope.payload())?;
        match serde_json::from_value(body.clone()) {
            Ok(inspected) => Some(inspected),
            Err(e) => {
                tracing::warn!(event_id = %envelope.event_id(), error = %e, "undecodable GRN inspection payload");
                None
            }
        }
    }

    fn create_vendor_return(inspected: &GrnInspected) -> Option<SagaAction> {
        let lines: Vec<VendorReturnLine> = inspected.discrepancies().iter().map(VendorReturnLine::from).collect();
        if lines.is_empty() {
            return None;
        }

        let return_id = vendor_return_id(inspected.grn_id);
        let cmd = CreateVendorReturn {
            tenant_id: inspected.tenant_id,
            return_id,
            reference: format!("VR-{}", inspected.grn_reference),
            vendor_code: inspected.vendor_code.clone(),
            source: ReturnSource::Grn {
                grn_id: inspected.grn_id,
                purchase_order_id: inspected.purchase_order_id,
            },
            lines,
            note: Some(format!("raised from GRN {} ({})", inspected.grn_reference, inspected.outcome)),
            created_by: UserId::system(),
            occurred_at: inspected.occurred_at,
        };

        Some(SagaAction::Command {
            aggregate_type: "purchasing.vendor_return".to_string(),
            aggregate_id: return_id,
            command_type: CREATE.to_string(),
            payload: serde_json::to_value(cmd).ok()?,
        })
    }

    fn create_debit_note(inspected: &GrnInspected) -> Option<SagaAction> {
        let lines: Vec<DebitNoteLine> = inspected
            .discrepancies()
            .into_iter()
            .filter(|d| d.kind == DiscrepancyKind::Shortage)
            .map(|d| DebitNoteLine {
                material_code: d.material_code,
                quantity: d.quantity,
                unit_price: d.unit_price,
            })
            .collect();
        if lines.is_empty() {
            return None;
        }

        let note_id = debit_note_id(inspected.grn_id);
        let cmd = CreateDebitNote {
            tenant_id: inspected.tenant_id,
            note_id,
            reference: format!("DN-{}", inspected.grn_reference),
            vendor_code: inspected.vendor_code.clone(),
            grn_id: Some(inspected.grn_id),
            lines,
            created_by: UserId::system(),
            occurred_at: inspected.occurred_at,
        };

        Some(SagaAction::Command {
            aggregate_type: "finance.debit_note".to_string(),
            aggregate_id: note_id,
            command_type: CREATE.to_string(),
            payload: serde_json::to_value(cmd).ok()?,
        })
    }

    fn emit(event: &GrnDiscrepancyEvent) -> Option<SagaAction> {
        let event_type = match event {
            GrnDiscrepancyEvent::DocumentsRaised { .. } => RAISED_EVENT,
            GrnDiscrepancyEvent::NoDiscrepancy { .. } => NOTHING_TO_RAISE_EVENT,
        };
        Some(SagaAction::Emit {
            event_type: event_type.to_string(),
            payload: serde_json::to_value(event).ok()?,
        })
    }
}

impl Saga for GrnDiscrepancySaga {
    type State = GrnDiscrepancyState;
    type SagaEvent = GrnDiscrepancyEvent;
    type CorrelationId = AggregateId;

    fn saga_type() -> &'static str {
        SAGA_TYPE
    }

    fn correlate(envelope: &EventEnvelope<JsonValue>) -> Option<AggregateId> {
        (envelope.event_type() == GRN_INSPECTED_EVENT).then(|| envelope.aggregate_id())
    }

    fn saga_id(_tenant_id: TenantId, grn_id: &AggregateId) -> AggregateId {
        AggregateId::derived(*grn_id, SAGA_TYPE)
    }

    fn apply(state: &mut GrnDiscrepancyState, event: &GrnDiscrepancyEvent) {
        *state = match event {
            GrnDiscrepancyEvent::DocumentsRaised {
                vendor_return_id,
                debit_note_id,
                ..
            } => GrnDiscrepancyState::Raised {
                vendor_return_id: *vendor_return_id,
                debit_note_id: *debit_note_id,
            },
            GrnDiscrepancyEvent::NoDiscrepancy { .. } => GrnDiscrepancyState::NothingToRaise,
        };
    }

    fn react(
        state: &GrnDiscrepancyState,
        tenant_id: TenantId,
        grn_id: &AggregateId,
        incoming: &EventEnvelope<JsonValue>,
    ) -> Vec<SagaAction> {
        if *state != GrnDiscrepancyState::Waiting {
            return vec![];
        }
        let Some(inspected) = Self::inspected(incoming) else {
            return vec![];
        };
        if inspected.tenant_id != tenant_id || inspected.grn_id != *grn_id {
            tracing::warn!(grn_id = %grn_id, "GRN inspection payload does not match its envelope");
            return vec![];
        }

        let mut actions = Vec::new();
        let event = match inspected.outcome {
            GrnStatus::Shortage | GrnStatus::Excess => {
                actions.extend(Self::create_vendor_return(&inspected));
                let debit_note = if inspected.outcome == GrnStatus::Shortage {
                    let action = Self::create_debit_note(&inspected);
                    let raised = action.as_ref().map(|_| debit_note_id(*grn_id));
                    actions.extend(action);
                    raised
                } else {
                    None
                };
                GrnDiscrepancyEvent::DocumentsRaised {
                    grn_id: *grn_id,
                    outcome: inspected.outcome,
                    vendor_return_id: vendor_return_id(*grn_id),
                    debit_note_id: debit_note,
                }
            }
            _ => GrnDiscrepancyEvent::NoDiscrepancy { grn_id: *grn_id },
        };

        actions.extend(Self::emit(&event));
        actions.push(SagaAction::Complete);
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loomerp_finance::Money;
    use loomerp_purchasing::GrnLine;
    use uuid::Uuid;

    fn line(line_no: u32, ordered: u32, received: u32, rejected: u32) -> GrnLine {
        GrnLine {
            line_no,
            po_line_no: line_no,
            material_code: format!("FAB-{line_no:03}"),
            ordered,
            unit_price: Money::from_minor(1_250),
            received,
            rejected,
        }
    }

    fn envelope(outcome: GrnStatus, lines: Vec<GrnLine>) -> (TenantId, AggregateId, EventEnvelope<JsonValue>) {
        let (tenant_id, grn_id) = (TenantId::new(), AggregateId::new());
        let inspected = GrnInspected {
            tenant_id,
            grn_id,
            grn_reference: "GRN-0907".to_string(),
            purchase_order_id: AggregateId::new(),
            vendor_code: "V-YARN-11".to_string(),
            outcome,
            lines,
            occurred_at: Utc::now(),
        };
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            grn_id,
            "purchasing.grn",
            6,
            GRN_INSPECTED_EVENT,
            serde_json::json!({ "Inspected": inspected }),
        );
        (tenant_id, grn_id, env)
    }

    fn commands(actions: &[SagaAction]) -> Vec<(&str, AggregateId)> {
        actions
            .iter()
            .filter_map(|a| match a {
                SagaAction::Command {
                    aggregate_type,
                    aggregate_id,
                    ..
                } => Some((aggregate_type.as_str(), *aggregate_id)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn shortage_raises_a_vendor_return_and_a_debit_note() {
        let (tenant_id, grn_id, env) = envelope(GrnStatus::Shortage, vec![line(1, 100, 90, 5), line(2, 40, 40, 0)]);
        let corr = GrnDiscrepancySaga::correlate(&env).unwrap();

        let actions = GrnDiscrepancySaga::react(&GrnDiscrepancyState::Waiting, tenant_id, &corr, &env);

        assert_eq!(
            commands(&actions),
            vec![
                ("purchasing.vendor_return", vendor_return_id(grn_id)),
                ("finance.debit_note", debit_note_id(grn_id)),
            ]
        );
        let Some(SagaAction::Command { payload, .. }) = actions.get(1) else {
            panic!("expected debit note command");
        };
        let note: CreateDebitNote = serde_json::from_value(payload.clone()).unwrap();
        assert_eq!(note.lines.len(), 1);
        assert_eq!(note.lines[0].quantity, 15);
        assert_eq!(actions.last(), Some(&SagaAction::Complete));
    }

    #[test]
    fn excess_raises_only_a_vendor_return() {
        let (tenant_id, grn_id, env) = envelope(GrnStatus::Excess, vec![line(1, 100, 120, 0)]);
        let actions = GrnDiscrepancySaga::react(&GrnDiscrepancyState::Waiting, tenant_id, &grn_id, &env);
        assert_eq!(commands(&actions), vec![("purchasing.vendor_return", vendor_return_id(grn_id))]);
    }

    #[test]
    fn accepted_and_already_raised_produce_no_commands() {
        let (tenant_id, grn_id, env) = envelope(GrnStatus::Accepted, vec![line(1, 10, 10, 0)]);
        let actions = GrnDiscrepancySaga::react(&GrnDiscrepancyState::Waiting, tenant_id, &grn_id, &env);
        assert!(commands(&actions).is_empty());

        let (tenant_id, grn_id, env) = envelope(GrnStatus::Shortage, vec![line(1, 10, 2, 0)]);
        let raised = GrnDiscrepancyState::Raised {
            vendor_return_id: vendor_return_id(grn_id),
            debit_note_id: Some(debit_note_id(grn_id)),
        };
        assert!(GrnDiscrepancySaga::react(&raised, tenant_id, &grn_id, &env).is_empty());
    }

    #[test]
    fn only_inspection_events_correlate() {
        let (_, _, env) = envelope(GrnStatus::Shortage, vec![line(1, 10, 2, 0)]);
        let other = EventEnvelope::new(
            Uuid::now_v7(),
            env.tenant_id(),
            env.aggregate_id(),
            "purchasing.grn",
            5,
            "purchasing.grn.status_changed",
            serde_json::json!({}),
        );
        assert!(GrnDiscrepancySaga::correlate(&other).is_none());
        assert_eq!(GrnDiscrepancySaga::correlate(&env), Some(env.aggregate_id()));
    }
}
