//! Infrastructure layer: event log, aggregate runtime, points process,
//! application service, configuration and background workers.

pub mod application;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod processes;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use application::{ApplicationError, ErrorKind, Gamification, MonthlyRawData};
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, GamifyConfig};
pub use processes::{PointsProcess, PointsProcessError, ProcessOutcome};
