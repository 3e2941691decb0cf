//! CLI command implementations

pub mod history;
pub mod iterate;
pub mod project;
pub mod reset;
pub mod status;
pub mod validate;
