//! Alerting System
//!
//! Threshold lookup, breach classification, duplicate suppression and the
//! alert state machine.

mod evaluator;
mod guard;
mod lifecycle;
mod manager;
mod registry;

pub use evaluator::{classify, classify_bounds, find_breach, Breach, Classification};
pub use guard::DedupGuard;
pub use lifecycle::{draft_alert, transition, AlertAction, Reading, TransitionError};
pub use manager::{ActionOutcome, AlertConfig, AlertError, AlertManager};
pub use registry::{RegistryError, ThresholdRegistry};
