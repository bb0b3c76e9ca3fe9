//! # Directory Facade Library
//!
//! Sits between an application and a SCIM identity directory protected by
//! OAuth2 client credentials. Keeps one shared bearer token valid for all
//! concurrent callers and runs a single-use password reset workflow whose
//! tokens live inside the user's own directory record.
//!
//! Modules:
//! - `cache`: shared credential with single-flight refresh
//! - `sources`: token sources (OAuth2 client credentials)
//! - `directory`: directory records, client capability and SCIM adapter
//! - `reset`: reset token protocol, workflow and domain events
//! - `config`: service configuration loading and validation
//! - `server`: HTTP routes mapping workflow results to responses

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod observability;
pub mod reset;
pub mod resilience;
pub mod server;
pub mod sources;
pub mod utils;

#[cfg(test)]
pub mod tests;

pub use crate::config::service::ServiceConfig;
pub use crate::error::{DirectoryError, FacadeError};
