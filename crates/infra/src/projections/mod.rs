//! Projections (read model builders).
//!
//! Projections consume committed envelopes and build query-optimized read models.
//! They are tenant-isolated, idempotent under at-least-once delivery (per-stream
//! cursors) and rebuildable from the event store.

pub mod cursor_store;
pub mod status_board;

pub use cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
pub use status_board::{StatusBoardError, StatusBoardProjection, StatusRecord, STATUS_BOARD_PROJECTION};
