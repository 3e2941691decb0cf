//! Infrastructure layer module
//!
//! Process-level concerns that are not ports:
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod logging;
