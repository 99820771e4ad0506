//! HTTP route handlers

pub mod alerts;
pub mod measurements;
pub mod thresholds;
