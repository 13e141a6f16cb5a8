//! `gamify-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! aggregate traits, the domain error model, deterministic identities and the
//! natural keys those identities are derived from.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod keys;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::AggregateId;
pub use keys::{DistrictId, GroupId, MonthLabel, PlayerId};
pub use value_object::ValueObject;
