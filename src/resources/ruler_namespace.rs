//! `mimirtool_ruler_namespace`: the rule groups of one ruler namespace.
//!
//! State keeps the rules in their normalized form, or only their SHA-256
//! when `store_rules_sha256` is set. Plans compare that form rather than the
//! raw YAML, so reformatting or reordering groups is not a change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{found, from_state, to_state, ResourceContext};
use crate::client::ClientError;
use crate::error::ProviderError;
use crate::rules::{CheckOptions, RulesDocument};
use crate::schema::{Attribute, Diagnostic, Schema, ValueValidator};
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// Schema of the resource.
pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manage the rule groups of a Grafana Mimir ruler namespace.")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("Same as `namespace`."),
        )
        .with_attribute(
            "namespace",
            Attribute::required_string()
                .with_force_new()
                .with_validator(ValueValidator::NonEmpty)
                .with_description("The name of the namespace to create in Grafana Mimir."),
        )
        .with_attribute(
            "config_yaml",
            Attribute::required_string().with_description(
                "The namespace's groups rules definition to create in Grafana Mimir.",
            ),
        )
        .with_attribute(
            "strict",
            Attribute::optional_bool()
                .with_default(Value::Bool(false))
                .with_description(
                    "Fail when rule names do not follow the recording rule convention.",
                ),
        )
        .with_attribute(
            "recording_rule_check",
            Attribute::optional_bool()
                .with_default(Value::Bool(true))
                .with_description(
                    "Check recording rule names against the `level:metric:operation` convention.",
                ),
        )
}

/// State of a ruler namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulerNamespaceState {
    /// Always the namespace.
    #[serde(default)]
    pub id: Option<String>,
    /// Namespace name.
    pub namespace: String,
    /// Rules document: raw in plans, state form once applied.
    #[serde(default)]
    pub config_yaml: String,
    /// Naming problems are errors.
    #[serde(default)]
    pub strict: Option<bool>,
    /// Run the recording rule naming check.
    #[serde(default)]
    pub recording_rule_check: Option<bool>,
}

impl RulerNamespaceState {
    fn with_defaults(mut self) -> Self {
        self.id = Some(self.namespace.clone());
        self.strict = Some(self.strict.unwrap_or(false));
        self.recording_rule_check = Some(self.recording_rule_check.unwrap_or(true));
        self
    }

    fn check_options(&self) -> CheckOptions {
        CheckOptions {
            strict: self.strict.unwrap_or(false),
            recording_rule_check: self.recording_rule_check.unwrap_or(true),
        }
    }

    /// Parse the rules document and fail on structural or strict naming errors.
    fn document(&self) -> Result<RulesDocument, ProviderError> {
        let doc = RulesDocument::parse_checked(&self.config_yaml)?;
        if let Some(diag) = doc
            .check(self.check_options())
            .into_iter()
            .find(Diagnostic::is_error)
        {
            return Err(ProviderError::Validation(diag.summary));
        }
        Ok(doc)
    }
}

/// Validate a configuration: schema, then the rules document.
pub fn validate(config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = validation::validate(&schema(), config);
    if !diagnostics.is_empty() {
        return diagnostics;
    }
    let Some(yaml) = config.get("config_yaml").and_then(Value::as_str) else {
        return diagnostics;
    };

    let options = CheckOptions {
        strict: config.get("strict").and_then(Value::as_bool).unwrap_or(false),
        recording_rule_check: config
            .get("recording_rule_check")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    };

    match RulesDocument::parse(yaml) {
        Ok(doc) => diagnostics.extend(doc.check(options)),
        Err(err) => diagnostics.push(
            Diagnostic::error("Invalid rules document")
                .with_detail(err.to_string())
                .with_attribute("config_yaml"),
        ),
    }
    diagnostics
}

/// Whether `doc` matches what state already holds.
fn same_rules(ctx: &ResourceContext, prior_yaml: &str, doc: &RulesDocument) -> bool {
    let Ok(form) = doc.state_form(ctx.store_rules_sha256) else {
        return false;
    };
    if form == prior_yaml {
        return true;
    }
    if ctx.store_rules_sha256 {
        return false;
    }
    RulesDocument::parse(prior_yaml)
        .and_then(|prior| prior.normalized())
        .is_ok_and(|normalized| normalized == form)
}

/// Plan a create or update.
pub fn plan(
    ctx: &ResourceContext,
    prior: Option<Value>,
    proposed: Value,
) -> Result<PlanResult, ProviderError> {
    let mut planned = from_state::<RulerNamespaceState>(proposed)?.with_defaults();
    let doc = planned.document()?;

    if let Some(prior) = &prior {
        let prior_state: RulerNamespaceState = from_state(prior.clone())?;
        if prior_state.namespace == planned.namespace
            && same_rules(ctx, &prior_state.config_yaml, &doc)
        {
            debug!(namespace = %planned.namespace, "Rules unchanged");
            planned.config_yaml = prior_state.config_yaml;
        }
    }

    Ok(PlanResult::diff(&schema(), prior.as_ref(), to_state(&planned)?))
}

async fn push_groups(
    ctx: &ResourceContext,
    namespace: &str,
    doc: &RulesDocument,
) -> Result<(), ProviderError> {
    for group in &doc.groups {
        debug!(namespace, group = %group.name, "Pushing rule group");
        ctx.client.create_rule_group(namespace, group).await?;
    }
    Ok(())
}

/// Push every group of the planned document.
pub async fn create(ctx: &ResourceContext, planned: Value) -> Result<Value, ProviderError> {
    let mut state = from_state::<RulerNamespaceState>(planned)?.with_defaults();
    let doc = state.document()?;

    push_groups(ctx, &state.namespace, &doc).await?;
    info!(namespace = %state.namespace, groups = doc.groups.len(), "Created ruler namespace");

    state.config_yaml = doc.state_form(ctx.store_rules_sha256)?;
    to_state(&state)
}

/// Read the namespace back from Mimir. `None` when it has no rules.
pub async fn read(ctx: &ResourceContext, current: Value) -> Result<Option<Value>, ProviderError> {
    let mut state = from_state::<RulerNamespaceState>(current)?.with_defaults();

    let groups = match found(ctx.client.list_rules(&state.namespace).await)? {
        Some(groups) if !groups.is_empty() => groups,
        _ => {
            warn!(namespace = %state.namespace, "Ruler namespace not found, removing from state");
            return Ok(None);
        }
    };

    let remote = RulesDocument { groups };
    let form = remote.state_form(ctx.store_rules_sha256)?;
    // Keep the stored text when it only differs in formatting.
    if !same_rules(ctx, &state.config_yaml, &remote) {
        state.config_yaml = form;
    }
    Ok(Some(to_state(&state)?))
}

/// Delete groups that disappeared, then push every planned group.
pub async fn update(
    ctx: &ResourceContext,
    prior: Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    let prior = from_state::<RulerNamespaceState>(prior)?;
    let mut state = from_state::<RulerNamespaceState>(planned)?.with_defaults();

    // Only the check flags changed; the rules were suppressed in plan.
    if state.config_yaml == prior.config_yaml {
        return to_state(&state);
    }

    let doc = state.document()?;
    let namespace = state.namespace.clone();
    let remote = found(ctx.client.list_rules(&namespace).await)?.unwrap_or_default();
    let wanted = doc.group_names();

    for group in remote.iter().filter(|g| !wanted.contains(g.name.as_str())) {
        debug!(namespace = %namespace, group = %group.name, "Deleting rule group");
        match ctx.client.delete_rule_group(&namespace, &group.name).await {
            Ok(()) | Err(ClientError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    push_groups(ctx, &namespace, &doc).await?;
    info!(namespace = %namespace, groups = doc.groups.len(), "Updated ruler namespace");

    state.config_yaml = doc.state_form(ctx.store_rules_sha256)?;
    to_state(&state)
}

/// Delete the whole namespace.
pub async fn delete(ctx: &ResourceContext, current: Value) -> Result<(), ProviderError> {
    let state: RulerNamespaceState = from_state(current)?;
    found(ctx.client.delete_namespace(&state.namespace).await)?;
    info!(namespace = %state.namespace, "Deleted ruler namespace");
    Ok(())
}

/// Import by namespace name.
pub async fn import(
    ctx: &ResourceContext,
    resource_type: &str,
    id: &str,
) -> Result<Vec<ImportedResource>, ProviderError> {
    let seed = RulerNamespaceState {
        id: Some(id.to_string()),
        namespace: id.to_string(),
        config_yaml: String::new(),
        strict: None,
        recording_rule_check: None,
    };
    match read(ctx, to_state(&seed)?).await? {
        Some(state) => Ok(vec![ImportedResource::new(resource_type, state)]),
        None => Err(ClientError::NotFound(format!("rules namespace '{}'", id)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MimirClient;
    use crate::resources::fake::{Call, FakeMimir};
    use crate::resources::RULER_NAMESPACE;
    use crate::rules::sha256_hex;
    use serde_json::json;
    use std::sync::Arc;

    const TWO_GROUPS: &str = r#"
groups:
  - name: cpu
    rules:
      - record: instance:node_cpu:rate5m
        expr: rate(node_cpu_seconds_total[5m])
  - name: memory
    rules:
      - record: instance:node_memory:avail
        expr: node_memory_MemAvailable_bytes
"#;

    const ONE_GROUP: &str = r#"
groups:
  - name: cpu
    rules:
      - record: instance:node_cpu:rate5m
        expr: rate(node_cpu_seconds_total[5m])
"#;

    fn context(store_rules_sha256: bool) -> (Arc<FakeMimir>, ResourceContext) {
        let fake = Arc::new(FakeMimir::default());
        let ctx = ResourceContext::new(fake.clone(), store_rules_sha256, None);
        (fake, ctx)
    }

    fn config(namespace: &str, yaml: &str) -> Value {
        json!({"namespace": namespace, "config_yaml": yaml})
    }

    #[tokio::test]
    async fn test_create_pushes_every_group() {
        let (fake, ctx) = context(false);
        let state = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();

        assert_eq!(state["id"], "infra");
        assert_eq!(state["strict"], false);
        assert_eq!(state["recording_rule_check"], true);
        assert_eq!(fake.group_names("infra"), vec!["cpu", "memory"]);
        assert_eq!(
            state["config_yaml"],
            RulesDocument::parse(TWO_GROUPS).unwrap().normalized().unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_stores_sha256() {
        let (_fake, ctx) = context(true);
        let state = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();
        let stored = state["config_yaml"].as_str().unwrap();
        assert_eq!(stored.len(), 64);
        assert_eq!(
            stored,
            sha256_hex(&RulesDocument::parse(TWO_GROUPS).unwrap().normalized().unwrap())
        );
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_document() {
        let (fake, ctx) = context(false);
        let yaml = "groups:\n  - name: a\n    rules:\n      - expr: up\n";
        let err = create(&ctx, config("infra", yaml)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rules(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_strict_naming_blocks_create() {
        let (_fake, ctx) = context(false);
        let yaml =
            "groups:\n  - name: a\n    rules:\n      - record: up_total\n        expr: sum(up)\n";
        let mut cfg = config("infra", yaml);
        cfg["strict"] = json!(true);
        let err = create(&ctx, cfg).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_read_round_trips_state() {
        let (_fake, ctx) = context(false);
        let state = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();
        let read_back = read(&ctx, state.clone()).await.unwrap().unwrap();
        assert_eq!(read_back, state);
    }

    #[tokio::test]
    async fn test_read_missing_namespace_is_gone() {
        let (_fake, ctx) = context(false);
        let state = json!({"id": "infra", "namespace": "infra", "config_yaml": ONE_GROUP});
        assert!(read(&ctx, state).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_detects_drift_in_hash_mode() {
        let (fake, ctx) = context(true);
        let state = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();
        fake.delete_rule_group("infra", "memory").await.unwrap();

        let read_back = read(&ctx, state.clone()).await.unwrap().unwrap();
        assert_ne!(read_back["config_yaml"], state["config_yaml"]);
        assert_eq!(
            read_back["config_yaml"],
            RulesDocument::parse(ONE_GROUP).unwrap().state_form(true).unwrap()
        );
    }

    #[tokio::test]
    async fn test_update_deletes_removed_groups() {
        let (fake, ctx) = context(false);
        let prior = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();

        let state = update(&ctx, prior, config("infra", ONE_GROUP)).await.unwrap();

        assert_eq!(fake.group_names("infra"), vec!["cpu"]);
        assert!(fake
            .calls()
            .contains(&Call::DeleteGroup("infra".to_string(), "memory".to_string())));
        assert_eq!(
            state["config_yaml"],
            RulesDocument::parse(ONE_GROUP).unwrap().normalized().unwrap()
        );
    }

    #[tokio::test]
    async fn test_update_flags_only_skips_api() {
        let (fake, ctx) = context(true);
        let prior = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();
        let calls_before = fake.calls().len();

        let mut planned = prior.clone();
        planned["strict"] = json!(true);
        let state = update(&ctx, prior, planned).await.unwrap();

        assert_eq!(state["strict"], true);
        assert_eq!(fake.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_plan_suppresses_formatting_changes() {
        let (_fake, ctx) = context(false);
        let prior = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();

        let reordered = r#"
groups:
- name: memory
  rules:
  - {record: "instance:node_memory:avail", expr: node_memory_MemAvailable_bytes}
- name: cpu
  rules:
  - {record: "instance:node_cpu:rate5m", expr: "rate(node_cpu_seconds_total[5m])"}
"#;
        let plan = plan(&ctx, Some(prior.clone()), config("infra", reordered)).unwrap();
        assert!(!plan.has_changes());
        assert_eq!(plan.planned_state["config_yaml"], prior["config_yaml"]);
    }

    #[tokio::test]
    async fn test_plan_suppresses_in_hash_mode() {
        let (_fake, ctx) = context(true);
        let prior = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();
        let plan = plan(&ctx, Some(prior), config("infra", TWO_GROUPS)).unwrap();
        assert!(!plan.has_changes());
    }

    #[tokio::test]
    async fn test_plan_real_change_keeps_raw_yaml() {
        let (_fake, ctx) = context(true);
        let prior = create(&ctx, config("infra", TWO_GROUPS)).await.unwrap();
        let plan = plan(&ctx, Some(prior), config("infra", ONE_GROUP)).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "config_yaml");
        assert_eq!(plan.planned_state["config_yaml"], ONE_GROUP);
        assert!(!plan.requires_replace);
    }

    #[tokio::test]
    async fn test_plan_namespace_change_replaces() {
        let (_fake, ctx) = context(false);
        let prior = create(&ctx, config("infra", ONE_GROUP)).await.unwrap();
        let plan = plan(&ctx, Some(prior), config("platform", ONE_GROUP)).unwrap();
        assert!(plan.requires_replace);
    }

    #[tokio::test]
    async fn test_delete_and_delete_again() {
        let (fake, ctx) = context(false);
        let state = create(&ctx, config("infra", ONE_GROUP)).await.unwrap();
        delete(&ctx, state.clone()).await.unwrap();
        assert!(fake.group_names("infra").is_empty());
        delete(&ctx, state).await.unwrap();
    }

    #[tokio::test]
    async fn test_import() {
        let (_fake, ctx) = context(false);
        create(&ctx, config("infra", ONE_GROUP)).await.unwrap();

        let imported = import(&ctx, RULER_NAMESPACE, "infra").await.unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].state["namespace"], "infra");
        assert_eq!(
            imported[0].state["config_yaml"],
            RulesDocument::parse(ONE_GROUP).unwrap().normalized().unwrap()
        );

        let err = import(&ctx, RULER_NAMESPACE, "missing").await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_validate_reports_document_problems() {
        assert!(validate(&config("infra", ONE_GROUP)).is_empty());

        let diagnostics = validate(&config("infra", "groups: [oops"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("config_yaml"));

        let diagnostics = validate(&json!({"config_yaml": ONE_GROUP}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("namespace"));
    }
}
