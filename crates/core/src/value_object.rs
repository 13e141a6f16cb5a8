//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `GroupId`s
/// wrapping the same string are the same group. Natural keys and month labels
/// are value objects; aggregates (with an `AggregateId`) are not.
///
/// ```ignore
/// let a = GroupId::new("g1")?;
/// let b = GroupId::new("g1")?;
/// assert_eq!(a, b);
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
