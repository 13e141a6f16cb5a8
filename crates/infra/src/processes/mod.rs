//! Event-driven processes that react to committed account events.

pub mod points;

pub use points::{PointsProcess, PointsProcessError, ProcessOutcome};
