//! Finance documents: vendor credit notes and buyer-raised debit notes.
//!
//! Pure domain logic (no IO). Both documents follow static status lifecycles.

pub mod credit_note;
pub mod debit_note;
pub mod money;

pub use credit_note::{
    CreateCreditNote, CreditNote, CreditNoteCommand, CreditNoteCreated, CreditNoteEvent,
    CreditNoteStatus, RecordSettlement, SettlementRecorded, CREDIT_NOTE_LIFECYCLE,
};
pub use debit_note::{
    CreateDebitNote, DebitNote, DebitNoteCommand, DebitNoteCreated, DebitNoteEvent,
    DebitNoteLine, DebitNoteStatus, DEBIT_NOTE_LIFECYCLE,
};
pub use money::Money;
