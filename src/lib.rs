//! Provider plugin for Grafana Mimir.
//!
//! Manages two kinds of objects through Mimir's HTTP API:
//!
//! - `mimirtool_ruler_namespace`: the rule groups of one ruler namespace
//! - `mimirtool_alertmanager`: a tenant's alertmanager configuration
//!
//! The host starts the binary, reads the handshake line from stdout and
//! drives the provider over gRPC. Payloads are JSON documents carried in
//! protobuf byte fields.
//!
//! # Handshake Protocol
//!
//! ```text
//! MIMIRTOOL_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `MIMIRTOOL_PROVIDER|<protocol_version>|<address>`
//!
//! # Configuration
//!
//! Provider attributes may come from the configuration block or from
//! `MIMIR_*` environment variables; see [`config::provider_config_schema`].
//! [`ProviderConfig::load`] resolves both once per `configure` and the result
//! is handed to resources as a [`ResourceContext`].
//!
//! ```ignore
//! use mimirtool_provider::{serve, MimirProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mimirtool_provider::ProviderError> {
//!     serve(MimirProvider::new(env!("CARGO_PKG_VERSION"))).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod rules;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use client::{
    ClientConfig, ClientError, ClientFactory, HttpClient, HttpClientFactory, MimirClient,
    StaticClientFactory,
};
pub use config::{EnvSource, ProcessEnv, ProviderConfig};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::MimirProvider;
pub use resources::ResourceContext;
pub use rules::{RuleGroup, RulesDocument};
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};
