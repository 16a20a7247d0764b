// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum FlotillaError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("ACL token not found")]
    TokenNotFound,

    #[error("ACL token expired")]
    TokenExpired,

    #[error("No cluster leader")]
    NoLeader,

    #[error("No path to node {0}")]
    NoNodeConn(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown RPC method '{0}'")]
    UnknownMethod(String),

    #[error("subscription closed by server")]
    SubscriptionClosed,

    #[error("event broker is disabled")]
    BrokerDisabled,

    #[error("Keystore Error: {0}")]
    KeystoreError(String),

    #[error("Forwarding Error: {0}")]
    ForwardingError(String),

    #[error("Replication Error: {0}")]
    ReplicationError(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl FlotillaError {
    /// A short machine-readable code, carried on the wire alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            FlotillaError::Io(_) => "io",
            FlotillaError::PermissionDenied => "permission-denied",
            FlotillaError::TokenNotFound => "token-not-found",
            FlotillaError::TokenExpired => "token-expired",
            FlotillaError::NoLeader => "no-leader",
            FlotillaError::NoNodeConn(_) => "no-node-conn",
            FlotillaError::NotFound(_) => "not-found",
            FlotillaError::InvalidRequest(_) => "invalid-request",
            FlotillaError::UnknownMethod(_) => "unknown-method",
            FlotillaError::SubscriptionClosed => "subscription-closed",
            FlotillaError::BrokerDisabled => "broker-disabled",
            FlotillaError::KeystoreError(_) => "keystore",
            FlotillaError::ForwardingError(_) => "forwarding",
            FlotillaError::ReplicationError(_) => "replication",
            FlotillaError::Internal(_) => "internal",
        }
    }

    /// Reconstructs an error from a wire `{code, message}` pair.
    pub fn from_wire(code: &str, message: &str) -> Self {
        match code {
            "permission-denied" => FlotillaError::PermissionDenied,
            "token-not-found" => FlotillaError::TokenNotFound,
            "token-expired" => FlotillaError::TokenExpired,
            "no-leader" => FlotillaError::NoLeader,
            "subscription-closed" => FlotillaError::SubscriptionClosed,
            "broker-disabled" => FlotillaError::BrokerDisabled,
            "not-found" => FlotillaError::NotFound(message.to_string()),
            "invalid-request" => FlotillaError::InvalidRequest(message.to_string()),
            "no-node-conn" => FlotillaError::NoNodeConn(message.to_string()),
            "unknown-method" => FlotillaError::UnknownMethod(message.to_string()),
            _ => FlotillaError::Internal(message.to_string()),
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for FlotillaError {
    fn clone(&self) -> Self {
        match self {
            FlotillaError::Io(e) => FlotillaError::Io(Arc::clone(e)),
            FlotillaError::PermissionDenied => FlotillaError::PermissionDenied,
            FlotillaError::TokenNotFound => FlotillaError::TokenNotFound,
            FlotillaError::TokenExpired => FlotillaError::TokenExpired,
            FlotillaError::NoLeader => FlotillaError::NoLeader,
            FlotillaError::NoNodeConn(s) => FlotillaError::NoNodeConn(s.clone()),
            FlotillaError::NotFound(s) => FlotillaError::NotFound(s.clone()),
            FlotillaError::InvalidRequest(s) => FlotillaError::InvalidRequest(s.clone()),
            FlotillaError::UnknownMethod(s) => FlotillaError::UnknownMethod(s.clone()),
            FlotillaError::SubscriptionClosed => FlotillaError::SubscriptionClosed,
            FlotillaError::BrokerDisabled => FlotillaError::BrokerDisabled,
            FlotillaError::KeystoreError(s) => FlotillaError::KeystoreError(s.clone()),
            FlotillaError::ForwardingError(s) => FlotillaError::ForwardingError(s.clone()),
            FlotillaError::ReplicationError(s) => FlotillaError::ReplicationError(s.clone()),
            FlotillaError::Internal(s) => FlotillaError::Internal(s.clone()),
        }
    }
}

impl PartialEq for FlotillaError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FlotillaError::Io(e1), FlotillaError::Io(e2)) => e1.to_string() == e2.to_string(),
            (FlotillaError::NoNodeConn(s1), FlotillaError::NoNodeConn(s2)) => s1 == s2,
            (FlotillaError::NotFound(s1), FlotillaError::NotFound(s2)) => s1 == s2,
            (FlotillaError::InvalidRequest(s1), FlotillaError::InvalidRequest(s2)) => s1 == s2,
            (FlotillaError::UnknownMethod(s1), FlotillaError::UnknownMethod(s2)) => s1 == s2,
            (FlotillaError::KeystoreError(s1), FlotillaError::KeystoreError(s2)) => s1 == s2,
            (FlotillaError::ForwardingError(s1), FlotillaError::ForwardingError(s2)) => s1 == s2,
            (FlotillaError::ReplicationError(s1), FlotillaError::ReplicationError(s2)) => s1 == s2,
            (FlotillaError::Internal(s1), FlotillaError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for FlotillaError {
    fn from(e: std::io::Error) -> Self {
        FlotillaError::Io(Arc::new(e))
    }
}

impl From<uuid::Error> for FlotillaError {
    fn from(e: uuid::Error) -> Self {
        FlotillaError::Internal(format!("Failed to parse UUID: {e}"))
    }
}

impl From<serde_json::Error> for FlotillaError {
    fn from(e: serde_json::Error) -> Self {
        FlotillaError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<toml::de::Error> for FlotillaError {
    fn from(e: toml::de::Error) -> Self {
        FlotillaError::InvalidRequest(format!("policy parse error: {e}"))
    }
}
