//! Background consumption of the purchase topic
pub mod status;
pub mod worker;

pub use status::{ConsumerStatus, StatusSnapshot, WorkerState};
pub use worker::{ConsumerWorker, Outcome, WorkerConfig};
