//! Adapters implementing the domain ports.
//!
//! - llm: OpenAI-compatible HTTP client and a scripted mock
//! - verifier: model-backed single-sample verifier
//! - sqlite: durable repositories over sqlx
//! - memory: in-process repositories for tests and embedders

pub mod llm;
pub mod memory;
pub mod sqlite;
pub mod verifier;
