//! Ingestion Coordinator
//!
//! Validates submitted measurements, persists them and runs threshold
//! evaluation, duplicate suppression and alert creation as one unit of work
//! per measurement.

mod batch;
mod coordinator;
mod error;

pub use batch::{decode_measurement, BatchEntry, BatchItemError, BatchReport, FieldError};
pub use coordinator::{AlertDecision, Coordinator, IngestConfig, Ingested};
pub use error::IngestError;
