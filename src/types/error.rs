//! Unified error types for the synchronization engine
//!
//! This module defines error types that:
//! - Are serializable for embedding layers
//! - Carry enough context to be actionable in logs
//! - Map internal failures to domain-level variants

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine error type for session operations and resource updates
///
/// All errors are serializable so they can cross process or IPC boundaries.
/// The `SnapshotRegression` variant is the one fatal class: it signals that
/// the remote backend returned strictly less data than previously observed
/// for a thread, which must abort the update that discovered it instead of
/// being absorbed.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Snapshot regression: {0}")]
    SnapshotRegression(String),

    #[error("{0}")]
    Other(String),
}

// Implement From for common error types

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Parse(err.to_string())
    }
}

impl From<String> for BridgeError {
    fn from(err: String) -> Self {
        BridgeError::Other(err)
    }
}

impl From<&str> for BridgeError {
    fn from(err: &str) -> Self {
        BridgeError::Other(err.to_string())
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
