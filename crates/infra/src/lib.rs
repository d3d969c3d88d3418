//! Infrastructure layer: event store, command dispatch, read models and the
//! processing that follows a committed status change.

pub mod catalog;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod pipeline;
pub mod projections;
pub mod reactors;
pub mod read_model;
pub mod saga;
pub mod workers;
pub mod workflow;

#[cfg(test)]
mod integration_tests;
