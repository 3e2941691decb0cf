//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - pretty or JSON output on stderr
//! - optional rotated JSON log files via tracing-appender

pub mod logger;

pub use logger::{init_logging, LoggerImpl};
