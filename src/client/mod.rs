//! Grafana Mimir API client.
//!
//! Resources talk to Mimir through the object-safe [`MimirClient`] trait so
//! tests can substitute an in-memory implementation. [`HttpClient`] is the
//! real one. Clients are built by a [`ClientFactory`] handed to the provider
//! at construction.

mod http;

pub use http::HttpClient;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::redacted;
use crate::rules::RuleGroup;

/// Errors returned by [`MimirClient`] implementations.
///
/// Messages never include the API key or token.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured address is not a usable base URL.
    #[error("invalid Mimir address: {0}")]
    InvalidAddress(String),

    /// Both a bearer token and basic auth credentials were configured.
    #[error("at most one of basic auth or auth token should be configured")]
    ConflictingAuth,

    /// Only one of the client certificate and key was configured.
    #[error("tls_cert_path and tls_key_path must be set together")]
    IncompleteIdentity,

    /// A TLS file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadTls {
        /// The file that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TLS material could not be decoded.
    #[error("invalid TLS material in {}: {source}", path.display())]
    Tls {
        /// The file that failed.
        path: PathBuf,
        /// Decoding error.
        source: reqwest::Error,
    },

    /// The CA file holds no PEM certificates.
    #[error("no certificates found in {}", .0.display())]
    EmptyCaBundle(PathBuf),

    /// The tenant ID cannot be sent as a header value.
    #[error("tenant id is not a valid header value")]
    InvalidHeader,

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(reqwest::Error),

    /// The request failed before a response arrived.
    #[error("request to {path} failed: {source}")]
    Request {
        /// Request path (never includes credentials).
        path: String,
        /// Underlying error, with the URL stripped.
        source: reqwest::Error,
    },

    /// Mimir answered 404.
    #[error("{0} not found")]
    NotFound(String),

    /// Mimir answered with another non-success status.
    #[error("Mimir returned {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// A response or request body could not be (de)serialized.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ClientError {
    /// Whether the error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// TLS settings for the HTTP client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA bundle used to verify the server.
    pub ca_path: Option<PathBuf>,
    /// Client certificate.
    pub cert_path: Option<PathBuf>,
    /// Client key.
    pub key_path: Option<PathBuf>,
    /// Skip server certificate verification.
    pub insecure_skip_verify: bool,
}

/// Everything needed to build a client.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Mimir base address.
    pub address: String,
    /// Tenant, sent as `X-Scope-OrgID`.
    pub tenant_id: Option<String>,
    /// Basic auth user.
    pub user: Option<String>,
    /// Basic auth password. Empty means unset.
    pub key: String,
    /// Bearer token.
    pub auth_token: Option<String>,
    /// TLS settings.
    pub tls: TlsConfig,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Prefix of the ruler configuration API.
    pub prometheus_http_prefix: String,
    /// Prefix of the alertmanager UI and status endpoints.
    pub alertmanager_http_prefix: String,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("tenant_id", &self.tenant_id)
            .field("user", &self.user)
            .field("key", &redacted(!self.key.is_empty()))
            .field("auth_token", &redacted(self.auth_token.is_some()))
            .field("tls", &self.tls)
            .field("user_agent", &self.user_agent)
            .field("prometheus_http_prefix", &self.prometheus_http_prefix)
            .field("alertmanager_http_prefix", &self.alertmanager_http_prefix)
            .finish()
    }
}

/// A tenant's alertmanager configuration as exchanged with Mimir.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertmanagerConfig {
    /// The alertmanager configuration document (YAML).
    pub alertmanager_config: String,
    /// Notification templates by file name.
    #[serde(default)]
    pub template_files: BTreeMap<String, String>,
}

/// Operations the resources need from Mimir.
#[async_trait]
pub trait MimirClient: Send + Sync {
    /// Create or replace one rule group in a namespace.
    async fn create_rule_group(&self, namespace: &str, group: &RuleGroup)
        -> Result<(), ClientError>;

    /// Delete one rule group.
    async fn delete_rule_group(&self, namespace: &str, group: &str) -> Result<(), ClientError>;

    /// List the rule groups of a namespace. Mimir answers 404, reported as
    /// [`ClientError::NotFound`], when the tenant has no rules at all; a
    /// response that does not mention the namespace yields an empty list.
    async fn list_rules(&self, namespace: &str) -> Result<Vec<RuleGroup>, ClientError>;

    /// Delete a namespace and all its groups.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), ClientError>;

    /// Set the tenant's alertmanager configuration.
    async fn create_alertmanager_config(
        &self,
        config: &AlertmanagerConfig,
    ) -> Result<(), ClientError>;

    /// Fetch the tenant's alertmanager configuration.
    async fn get_alertmanager_config(&self) -> Result<AlertmanagerConfig, ClientError>;

    /// Remove the tenant's alertmanager configuration.
    async fn delete_alertmanager_config(&self) -> Result<(), ClientError>;
}

/// Builds clients during `configure`.
pub trait ClientFactory: Send + Sync {
    /// Build a client from its configuration.
    fn build(&self, config: ClientConfig) -> Result<Arc<dyn MimirClient>, ClientError>;
}

/// Builds an [`HttpClient`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn build(&self, config: ClientConfig) -> Result<Arc<dyn MimirClient>, ClientError> {
        Ok(Arc::new(HttpClient::new(config)?))
    }
}

/// Hands out the same pre-built client every time, ignoring the
/// configuration.
#[derive(Clone)]
pub struct StaticClientFactory {
    client: Arc<dyn MimirClient>,
}

impl StaticClientFactory {
    /// Wrap an existing client.
    pub fn new(client: Arc<dyn MimirClient>) -> Self {
        Self { client }
    }
}

impl ClientFactory for StaticClientFactory {
    fn build(&self, _config: ClientConfig) -> Result<Arc<dyn MimirClient>, ClientError> {
        Ok(Arc::clone(&self.client))
    }
}
