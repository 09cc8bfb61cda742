//! Error types for the Mimir provider.

use thiserror::Error;

use crate::client::ClientError;
use crate::rules::RulesError;

/// Errors returned by provider and resource operations.
///
/// Every variant is turned into an error diagnostic by the gRPC layer, so
/// messages must never carry credentials.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// An operation ran before `configure` succeeded.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A state document was missing a field or had the wrong shape.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A rules document could not be parsed.
    #[error("Rules error: {0}")]
    Rules(#[from] RulesError),

    /// The Mimir API call failed.
    #[error("Mimir client error: {0}")]
    Client(#[from] ClientError),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Binding or inspecting the listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}
