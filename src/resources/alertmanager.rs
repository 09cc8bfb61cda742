//! `mimirtool_alertmanager`: the tenant's alertmanager configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{found, from_state, to_state, ResourceContext};
use crate::client::{AlertmanagerConfig, ClientError};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// `id` when no tenant is configured.
pub const ANONYMOUS_TENANT: &str = "anonymous";

/// Schema of the resource.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manage the alertmanager configuration of a Grafana Mimir tenant.")
        .with_attribute(
            "id",
            Attribute::computed_string()
                .with_description("The tenant the configuration belongs to."),
        )
        .with_attribute(
            "config_yaml",
            Attribute::required_string().with_description("The alertmanager configuration."),
        )
        .with_attribute(
            "templates_config_yaml",
            Attribute::optional_string_map()
                .with_description("Notification templates, keyed by file name."),
        )
}

/// State of the alertmanager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertmanagerState {
    /// Tenant ID, or `anonymous`.
    #[serde(default)]
    pub id: Option<String>,
    /// Alertmanager configuration document.
    pub config_yaml: String,
    /// Notification templates.
    #[serde(default)]
    pub templates_config_yaml: Option<BTreeMap<String, String>>,
}

impl AlertmanagerState {
    fn with_id(mut self, ctx: &ResourceContext) -> Self {
        self.id = Some(
            ctx.tenant_id
                .clone()
                .unwrap_or_else(|| ANONYMOUS_TENANT.to_string()),
        );
        self
    }

    fn templates(&self) -> BTreeMap<String, String> {
        self.templates_config_yaml.clone().unwrap_or_default()
    }

    fn to_request(&self) -> AlertmanagerConfig {
        AlertmanagerConfig {
            alertmanager_config: self.config_yaml.clone(),
            template_files: self.templates(),
        }
    }
}

/// Whether two YAML documents hold the same data. Falls back to comparing
/// text when either fails to parse.
pub fn yaml_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_yaml::from_str::<serde_yaml::Value>(a),
        serde_yaml::from_str::<serde_yaml::Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Validate a configuration: schema, then the YAML of `config_yaml`.
pub fn validate(config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = validation::validate(&schema(), config);
    if !diagnostics.is_empty() {
        return diagnostics;
    }
    if let Some(yaml) = config.get("config_yaml").and_then(Value::as_str) {
        match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
            Ok(serde_yaml::Value::Mapping(_)) => {}
            Ok(_) => diagnostics.push(
                Diagnostic::error("Invalid alertmanager configuration")
                    .with_detail("config_yaml must be a YAML mapping")
                    .with_attribute("config_yaml"),
            ),
            Err(err) => diagnostics.push(
                Diagnostic::error("Invalid alertmanager configuration")
                    .with_detail(err.to_string())
                    .with_attribute("config_yaml"),
            ),
        }
    }
    diagnostics
}

/// Plan a create or update.
pub fn plan(
    ctx: &ResourceContext,
    prior: Option<Value>,
    proposed: Value,
) -> Result<PlanResult, ProviderError> {
    let mut planned = from_state::<AlertmanagerState>(proposed)?.with_id(ctx);

    if let Some(prior) = &prior {
        let prior_state: AlertmanagerState = from_state(prior.clone())?;
        if yaml_equivalent(&prior_state.config_yaml, &planned.config_yaml) {
            planned.config_yaml = prior_state.config_yaml.clone();
        }
        if planned.templates() == prior_state.templates() {
            planned.templates_config_yaml = prior_state.templates_config_yaml;
        }
    }

    Ok(PlanResult::diff(&schema(), prior.as_ref(), to_state(&planned)?))
}

/// Upload the configuration.
pub async fn create(ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
    let state = from_state::<AlertmanagerState>(planned)?.with_id(ctx);
    ctx.client
        .create_alertmanager_config(&state.to_request())
        .await?;
    info!(tenant = ?state.id, "Set alertmanager configuration");
    to_state(&state)
}

/// Fetch the configuration. `None` when the tenant has none.
pub async fn read(ctx: &ResourceContext, current: Value) -> Result<Option<Value>, ProviderError> {
    let mut state = from_state::<AlertmanagerState>(current)?.with_id(ctx);

    let Some(remote) = found(ctx.client.get_alertmanager_config().await)? else {
        warn!(tenant = ?state.id, "Alertmanager configuration not found, removing from state");
        return Ok(None);
    };

    if !yaml_equivalent(&state.config_yaml, &remote.alertmanager_config) {
        debug!(tenant = ?state.id, "Alertmanager configuration changed remotely");
        state.config_yaml = remote.alertmanager_config;
    }
    if state.templates() != remote.template_files {
        state.templates_config_yaml = Some(remote.template_files);
    }
    Ok(Some(to_state(&state)?))
}

/// Replace the configuration.
pub async fn update(
    ctx: &ResourceContext,
    _prior: Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    create(ctx, planned).await
}

/// Remove the configuration.
pub async fn delete(ctx: &ResourceContext, _current: Value) -> Result<(), ProviderError> {
    found(ctx.client.delete_alertmanager_config().await)?;
    info!(tenant = ?ctx.tenant_id, "Deleted alertmanager configuration");
    Ok(())
}

/// Import the configured tenant's configuration. The ID is informational.
pub async fn import(
    ctx: &ResourceContext,
    resource_type: &str,
    id: &str,
) -> Result<Vec<ImportedResource>, ProviderError> {
    let seed = AlertmanagerState {
        id: Some(id.to_string()),
        config_yaml: String::new(),
        templates_config_yaml: None,
    };
    match read(ctx, to_state(&seed)?).await? {
        Some(state) => Ok(vec![ImportedResource::new(resource_type, state)]),
        None => Err(ClientError::NotFound("alertmanager configuration".to_string()).into()),
    }
}
