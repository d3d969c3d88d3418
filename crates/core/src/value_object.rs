//! Value objects: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes
/// (amounts, quantities, carrier details).
///
/// To "modify" a value object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
