//! Data Validation
//!
//! Field-level validation for submitted station measurements and operator
//! threshold input, plus configurable per-type plausibility rules.

mod error;
mod rules;
mod validator;

pub use error::ValidationError;
pub use rules::{RuleSet, ValueRule};
pub use validator::{
    ValidationConfig, ValidationReport, Validator, DECIMAL_PLACES, MAX_DIGITS,
};
