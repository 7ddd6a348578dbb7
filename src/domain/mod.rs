//! Domain layer for Shepherd
//!
//! This module contains core workflow models, the transition table, and the
//! ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
