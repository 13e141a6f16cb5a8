//! Background worker threads fed by the event bus.

pub mod process_worker;

pub use process_worker::{ProcessWorker, WorkerHandle};
