//! Provider configuration loading.
//!
//! The provider schema declares, per attribute, which environment variables
//! may supply a value and what the default is. [`ProviderConfig::load`] is the
//! single step that applies those bindings: a declared (non-null) value wins
//! over the environment, which wins over the schema default. The result is a
//! typed, immutable [`ProviderConfig`].
//!
//! Environment access goes through [`EnvSource`] so precedence can be tested
//! without touching the process environment.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::{ClientConfig, TlsConfig};
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema, ValueValidator};
use crate::validation;

/// Default path prefix for the Prometheus-compatible ruler API.
pub const DEFAULT_PROMETHEUS_HTTP_PREFIX: &str = "/prometheus";

/// Default path prefix for the alertmanager.
pub const DEFAULT_ALERTMANAGER_HTTP_PREFIX: &str = "/alertmanager";

/// A read-only view of environment variables.
pub trait EnvSource: Send + Sync {
    /// Return the value of `name`, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Schema of the provider configuration block.
///
/// `MIMIR_API_USER.` and `MIMIR_AUTH_TOKEN.` (with the trailing period) are
/// still read after the documented names so existing setups keep working.
pub fn provider_config_schema() -> Schema {
    Schema::v0()
        .with_description("Manage Grafana Mimir ruler namespaces and alertmanager configuration.")
        .with_attribute(
            "url",
            Attribute::required_string()
                .with_env("MIMIR_ADDRESS")
                .with_validator(ValueValidator::HttpUrl)
                .with_description(
                    "Address to use when contacting Grafana Mimir. May alternatively be set via the `MIMIR_ADDRESS` environment variable.",
                ),
        )
        .with_attribute(
            "tenant_id",
            Attribute::optional_string()
                .with_env("MIMIR_TENANT_ID")
                .with_description(
                    "Tenant ID to use when contacting Grafana Mimir. May alternatively be set via the `MIMIR_TENANT_ID` environment variable.",
                ),
        )
        .with_attribute(
            "user",
            Attribute::optional_string()
                .with_env("MIMIR_API_USER")
                .with_env("MIMIR_API_USER.")
                .with_description(
                    "API user to use when contacting Grafana Mimir. May alternatively be set via the `MIMIR_API_USER` environment variable.",
                ),
        )
        .with_attribute(
            "key",
            Attribute::optional_string()
                .sensitive()
                .with_env("MIMIR_API_KEY")
                .with_default(Value::String(String::new()))
                .with_description(
                    "API key to use when contacting Grafana Mimir. May alternatively be set via the `MIMIR_API_KEY` environment variable.",
                ),
        )
        .with_attribute(
            "token",
            Attribute::optional_string()
                .sensitive()
                .with_env("MIMIR_AUTH_TOKEN")
                .with_env("MIMIR_AUTH_TOKEN.")
                .with_description(
                    "Authentication token for bearer token or JWT auth when contacting Grafana Mimir. May alternatively be set via the `MIMIR_AUTH_TOKEN` environment variable.",
                ),
        )
        .with_attribute(
            "tls_key_path",
            Attribute::optional_string()
                .with_env("MIMIR_TLS_KEY_PATH")
                .with_description(
                    "Client TLS key file to use to authenticate to the MIMIR server. May alternatively be set via the `MIMIR_TLS_KEY_PATH` environment variable.",
                ),
        )
        .with_attribute(
            "tls_cert_path",
            Attribute::optional_string()
                .with_env("MIMIR_TLS_CERT_PATH")
                .with_description(
                    "Client TLS certificate file to use to authenticate to the MIMIR server. May alternatively be set via the `MIMIR_TLS_CERT_PATH` environment variable.",
                ),
        )
        .with_attribute(
            "ca_cert_path",
            Attribute::optional_string()
                .with_env("MIMIR_CA_CERT_PATH")
                .with_description(
                    "Certificate CA bundle to use to verify the MIMIR server's certificate. May alternatively be set via the `MIMIR_CA_CERT_PATH` environment variable.",
                ),
        )
        .with_attribute(
            "insecure_skip_verify",
            Attribute::optional_bool()
                .with_env("MIMIR_INSECURE_SKIP_VERIFY")
                .with_description(
                    "Skip TLS certificate verification. May alternatively be set via the `MIMIR_INSECURE_SKIP_VERIFY` environment variable.",
                ),
        )
        .with_attribute(
            "prometheus_http_prefix",
            Attribute::optional_string()
                .with_env("MIMIR_API_PREFIX")
                .with_default(Value::String(DEFAULT_PROMETHEUS_HTTP_PREFIX.to_string()))
                .with_description(
                    "Path prefix to use for rules. May alternatively be set via the `MIMIR_API_PREFIX` environment variable.",
                ),
        )
        .with_attribute(
            "alertmanager_http_prefix",
            Attribute::optional_string()
                .with_env("MIMIR_ALERTMANAGER_HTTP_PREFIX")
                .with_default(Value::String(DEFAULT_ALERTMANAGER_HTTP_PREFIX.to_string()))
                .with_description(
                    "Path prefix to use for alertmanager. May alternatively be set via the `MIMIR_ALERTMANAGER_HTTP_PREFIX` environment variable.",
                ),
        )
        .with_attribute(
            "store_rules_sha256",
            Attribute::optional_bool()
                .with_env("MIMIR_STORE_RULES_SHA256")
                .with_default(Value::Bool(false))
                .with_description(
                    "Set to true if you want to save only the sha256sum instead of namespace's groups rules definition in the tfstate.",
                ),
        )
}

/// Typed provider configuration, immutable once loaded.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Mimir base address.
    pub url: String,
    /// Value of the `X-Scope-OrgID` header.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Basic auth user.
    #[serde(default)]
    pub user: Option<String>,
    /// Basic auth password / API key. Empty means unset.
    #[serde(default)]
    pub key: String,
    /// Bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// Client TLS key.
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
    /// Client TLS certificate.
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    /// CA bundle for verifying the server.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Disable server certificate verification.
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Prefix of the ruler configuration API.
    #[serde(default = "default_prometheus_prefix")]
    pub prometheus_http_prefix: String,
    /// Prefix of the alertmanager endpoints.
    #[serde(default = "default_alertmanager_prefix")]
    pub alertmanager_http_prefix: String,
    /// Store a SHA-256 of the rules instead of the rules themselves.
    #[serde(default)]
    pub store_rules_sha256: bool,
}

fn default_prometheus_prefix() -> String {
    DEFAULT_PROMETHEUS_HTTP_PREFIX.to_string()
}

fn default_alertmanager_prefix() -> String {
    DEFAULT_ALERTMANAGER_HTTP_PREFIX.to_string()
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("url", &self.url)
            .field("tenant_id", &self.tenant_id)
            .field("user", &self.user)
            .field("key", &redacted(!self.key.is_empty()))
            .field("token", &redacted(self.token.is_some()))
            .field("tls_key_path", &self.tls_key_path)
            .field("tls_cert_path", &self.tls_cert_path)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("prometheus_http_prefix", &self.prometheus_http_prefix)
            .field("alertmanager_http_prefix", &self.alertmanager_http_prefix)
            .field("store_rules_sha256", &self.store_rules_sha256)
            .finish()
    }
}

pub(crate) fn redacted(set: bool) -> &'static str {
    if set {
        "<redacted>"
    } else {
        "<unset>"
    }
}

impl ProviderConfig {
    /// Load the configuration from declared values and the environment.
    ///
    /// Returns every problem found as an error diagnostic.
    pub fn load(declared: &Value, env: &dyn EnvSource) -> Result<Self, Vec<Diagnostic>> {
        let schema = provider_config_schema();
        let resolved = resolve(&schema, declared, env)?;
        validation::validate_result(&schema, &resolved)?;

        let mut config: ProviderConfig = serde_json::from_value(resolved).map_err(|e| {
            vec![Diagnostic::error("Invalid provider configuration").with_detail(e.to_string())]
        })?;
        config.tenant_id = non_empty(config.tenant_id);
        config.user = non_empty(config.user);
        config.token = non_empty(config.token);
        config.tls_key_path = config.tls_key_path.filter(|p| !p.as_os_str().is_empty());
        config.tls_cert_path = config.tls_cert_path.filter(|p| !p.as_os_str().is_empty());
        config.ca_cert_path = config.ca_cert_path.filter(|p| !p.as_os_str().is_empty());
        Ok(config)
    }

    /// Settings for the API client.
    pub fn client_config(&self, user_agent: impl Into<String>) -> ClientConfig {
        ClientConfig {
            address: self.url.clone(),
            tenant_id: self.tenant_id.clone(),
            user: self.user.clone(),
            key: self.key.clone(),
            auth_token: self.token.clone(),
            tls: TlsConfig {
                ca_path: self.ca_cert_path.clone(),
                cert_path: self.tls_cert_path.clone(),
                key_path: self.tls_key_path.clone(),
                insecure_skip_verify: self.insecure_skip_verify,
            },
            user_agent: user_agent.into(),
            prometheus_http_prefix: self.prometheus_http_prefix.clone(),
            alertmanager_http_prefix: self.alertmanager_http_prefix.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Apply declared > environment > default precedence for every attribute.
///
/// Values read from the environment are converted to the attribute's type;
/// attributes with no value anywhere are left out.
pub fn resolve(
    schema: &Schema,
    declared: &Value,
    env: &dyn EnvSource,
) -> Result<Value, Vec<Diagnostic>> {
    let declared = match declared {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(vec![Diagnostic::error("Expected object")
                .with_detail(format!("Provider configuration must be an object, got {}", other))]);
        }
    };

    let mut resolved = Map::new();
    let mut diagnostics = Vec::new();

    for (name, value) in &declared {
        if !value.is_null() {
            resolved.insert(name.clone(), value.clone());
        }
    }

    for (name, attr) in &schema.attributes {
        if resolved.contains_key(name) {
            continue;
        }
        match from_env(name, attr, env) {
            Ok(Some(value)) => {
                resolved.insert(name.clone(), value);
            }
            Ok(None) => {
                if let Some(default) = &attr.default {
                    resolved.insert(name.clone(), default.clone());
                }
            }
            Err(diag) => diagnostics.push(diag),
        }
    }

    if diagnostics.is_empty() {
        Ok(Value::Object(resolved))
    } else {
        Err(diagnostics)
    }
}

fn from_env(
    name: &str,
    attr: &Attribute,
    env: &dyn EnvSource,
) -> Result<Option<Value>, Diagnostic> {
    let Some((var, raw)) = attr
        .env_vars
        .iter()
        .find_map(|var| env.var(var).map(|raw| (var, raw)))
    else {
        return Ok(None);
    };

    debug!(attribute = name, env_var = %var, "Using environment variable");

    match attr.attr_type {
        AttributeType::Bool => parse_bool(&raw).map(|b| Some(Value::Bool(b))).ok_or_else(|| {
            Diagnostic::error(format!("Invalid value in environment variable `{}`", var))
                .with_detail("Expected a boolean (true, false, 1, 0, t, f)")
                .with_attribute(name)
        }),
        _ => Ok(Some(Value::String(raw))),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}
