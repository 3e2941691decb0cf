//! Domain layer for promptloop
//!
//! Core models, the error taxonomy, and the port traits that adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{Cancelled, DomainError, DomainResult};
