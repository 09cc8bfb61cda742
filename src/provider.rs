//! The `mimirtool` provider.
//!
//! [`MimirProvider`] owns no API client until `configure` succeeds. From then
//! on every resource operation receives the same immutable
//! [`ResourceContext`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::client::{ClientFactory, HttpClientFactory};
use crate::config::{provider_config_schema, EnvSource, ProcessEnv, ProviderConfig};
use crate::error::ProviderError;
use crate::resources::{self, alertmanager, ruler_namespace, ResourceContext};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// `User-Agent` sent to Mimir for a given provider version.
pub fn user_agent(version: &str) -> String {
    format!("terraform-provider-mimirtool/{}", version)
}

/// Provider for Grafana Mimir rules and alertmanager configuration.
pub struct MimirProvider {
    version: String,
    factory: Arc<dyn ClientFactory>,
    env: Arc<dyn EnvSource>,
    context: RwLock<Option<Arc<ResourceContext>>>,
}

impl MimirProvider {
    /// Provider talking HTTP to Mimir, reading the process environment.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            factory: Arc::new(HttpClientFactory),
            env: Arc::new(ProcessEnv),
            context: RwLock::new(None),
        }
    }

    /// Replace the client factory.
    pub fn with_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Replace the environment source.
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    /// Provider version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Context built by the last successful `configure`.
    pub async fn context(&self) -> Result<Arc<ResourceContext>, ProviderError> {
        self.context.read().await.clone().ok_or_else(|| {
            ProviderError::NotConfigured(
                "configure must succeed before resource operations".to_string(),
            )
        })
    }
}

impl fmt::Debug for MimirProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configured = self.context.try_read().map(|c| c.is_some()).unwrap_or(false);
        f.debug_struct("MimirProvider")
            .field("version", &self.version)
            .field("configured", &configured)
            .finish_non_exhaustive()
    }
}

fn unknown(resource_type: &str) -> ProviderError {
    ProviderError::UnknownResource(resource_type.to_string())
}

#[async_trait::async_trait]
impl ProviderService for MimirProvider {
    fn schema(&self) -> ProviderSchema {
        resources::schemas().into_iter().fold(
            ProviderSchema::new().with_provider_config(provider_config_schema()),
            |schema, (name, resource)| schema.with_resource(name, resource),
        )
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(ProviderConfig::load(&config, self.env.as_ref()).err().unwrap_or_default())
    }

    #[instrument(skip(self, config), fields(version = %self.version))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = match ProviderConfig::load(&config, self.env.as_ref()) {
            Ok(config) => config,
            Err(diagnostics) => return Ok(diagnostics),
        };

        let client = match self
            .factory
            .build(config.client_config(user_agent(&self.version)))
        {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "Failed to build Mimir client");
                return Ok(vec![Diagnostic::error("Unable to create Mimir client")
                    .with_detail(err.to_string())]);
            }
        };

        *self.context.write().await = Some(Arc::new(ResourceContext::new(
            client,
            config.store_rules_sha256,
            config.tenant_id.clone(),
        )));
        info!(
            url = %config.url,
            tenant = ?config.tenant_id,
            store_rules_sha256 = config.store_rules_sha256,
            "Provider configured"
        );
        Ok(vec![])
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            resources::RULER_NAMESPACE => Ok(ruler_namespace::validate(&config)),
            resources::ALERTMANAGER => Ok(alertmanager::validate(&config)),
            other => Err(unknown(other)),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = match resource_type {
            resources::RULER_NAMESPACE => ruler_namespace::schema(),
            resources::ALERTMANAGER => alertmanager::schema(),
            other => return Err(unknown(other)),
        };
        if proposed_state.is_null() {
            return Ok(PlanResult::diff(&schema, prior_state.as_ref(), Value::Null));
        }

        let ctx = self.context().await?;
        match resource_type {
            resources::RULER_NAMESPACE => ruler_namespace::plan(&ctx, prior_state, proposed_state),
            _ => alertmanager::plan(&ctx, prior_state, proposed_state),
        }
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let ctx = self.context().await?;
        match resource_type {
            resources::RULER_NAMESPACE => ruler_namespace::create(&ctx, planned_state).await,
            resources::ALERTMANAGER => alertmanager::create(&ctx, planned_state).await,
            other => Err(unknown(other)),
        }
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let ctx = self.context().await?;
        match resource_type {
            resources::RULER_NAMESPACE => ruler_namespace::read(&ctx, current_state).await,
            resources::ALERTMANAGER => alertmanager::read(&ctx, current_state).await,
            other => Err(unknown(other)),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let ctx = self.context().await?;
        match resource_type {
            resources::RULER_NAMESPACE => {
                ruler_namespace::update(&ctx, prior_state, planned_state).await
            }
            resources::ALERTMANAGER => alertmanager::update(&ctx, prior_state, planned_state).await,
            other => Err(unknown(other)),
        }
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let ctx = self.context().await?;
        match resource_type {
            resources::RULER_NAMESPACE => ruler_namespace::delete(&ctx, current_state).await,
            resources::ALERTMANAGER => alertmanager::delete(&ctx, current_state).await,
            other => Err(unknown(other)),
        }
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let ctx = self.context().await?;
        match resource_type {
            resources::RULER_NAMESPACE => ruler_namespace::import(&ctx, resource_type, id).await,
            resources::ALERTMANAGER => alertmanager::import(&ctx, resource_type, id).await,
            other => Err(unknown(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, ClientError, MimirClient, StaticClientFactory};
    use crate::resources::fake::FakeMimir;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records the configuration it was asked to build from.
    #[derive(Default)]
    struct RecordingFactory {
        seen: Mutex<Vec<ClientConfig>>,
    }

    impl ClientFactory for RecordingFactory {
        fn build(&self, config: ClientConfig) -> Result<Arc<dyn MimirClient>, ClientError> {
            self.seen.lock().unwrap().push(config);
            Ok(Arc::new(FakeMimir::default()))
        }
    }

    struct FailingFactory;

    impl ClientFactory for FailingFactory {
        fn build(&self, _config: ClientConfig) -> Result<Arc<dyn MimirClient>, ClientError> {
            Err(ClientError::ConflictingAuth)
        }
    }

    fn no_env() -> Arc<dyn EnvSource> {
        Arc::new(HashMap::<String, String>::new())
    }

    fn provider_with(factory: Arc<dyn ClientFactory>) -> MimirProvider {
        MimirProvider::new("1.2.3").with_factory(factory).with_env(no_env())
    }

    #[tokio::test]
    async fn test_configure_uses_injected_client() {
        let fake: Arc<dyn MimirClient> = Arc::new(FakeMimir::default());
        let provider = provider_with(Arc::new(StaticClientFactory::new(fake.clone())));

        let diagnostics = provider
            .configure(json!({"url": "http://localhost:9009"}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());

        let ctx = provider.context().await.unwrap();
        assert!(Arc::ptr_eq(&ctx.client, &fake));
        assert!(!ctx.store_rules_sha256);
    }

    #[tokio::test]
    async fn test_configure_passes_settings_to_factory() {
        let factory = Arc::new(RecordingFactory::default());
        let provider = provider_with(factory.clone());

        provider
            .configure(json!({
                "url": "https://mimir.example.com",
                "tenant_id": "team-a",
                "user": "admin",
                "key": "secret",
                "prometheus_http_prefix": "/prom",
                "store_rules_sha256": true
            }))
            .await
            .unwrap();

        let seen = factory.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].address, "https://mimir.example.com");
        assert_eq!(seen[0].tenant_id.as_deref(), Some("team-a"));
        assert_eq!(seen[0].user.as_deref(), Some("admin"));
        assert_eq!(seen[0].key, "secret");
        assert_eq!(seen[0].prometheus_http_prefix, "/prom");
        assert_eq!(seen[0].user_agent, "terraform-provider-mimirtool/1.2.3");

        let ctx = provider.context().await.unwrap();
        assert!(ctx.store_rules_sha256);
        assert_eq!(ctx.tenant_id.as_deref(), Some("team-a"));
    }

    #[tokio::test]
    async fn test_configure_reads_injected_env() {
        let factory = Arc::new(RecordingFactory::default());
        let env: HashMap<String, String> = [
            ("MIMIR_ADDRESS", "http://env:9009"),
            ("MIMIR_STORE_RULES_SHA256", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let provider = MimirProvider::new("dev")
            .with_factory(factory.clone())
            .with_env(Arc::new(env));

        assert!(provider.configure(json!({})).await.unwrap().is_empty());
        assert_eq!(factory.seen.lock().unwrap()[0].address, "http://env:9009");
        assert!(provider.context().await.unwrap().store_rules_sha256);
    }

    #[tokio::test]
    async fn test_configure_errors_hide_credentials() {
        let provider = provider_with(Arc::new(FailingFactory));
        let diagnostics = provider
            .configure(json!({
                "url": "https://mimir.example.com",
                "key": "hunter2",
                "token": "t0k3n"
            }))
            .await
            .unwrap();

        assert_eq!(diagnostics.len(), 1);
        let rendered = format!("{:?}", diagnostics);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("t0k3n"));
        assert!(provider.context().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_returns_diagnostics() {
        let provider = provider_with(Arc::new(RecordingFactory::default()));
        let diagnostics = provider.configure(json!({"url": "not a url"})).await.unwrap();
        assert!(crate::schema::has_errors(&diagnostics));

        let diagnostics = provider
            .validate_provider_config(json!({"url": "http://localhost:9009"}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let provider = provider_with(Arc::new(RecordingFactory::default()));
        let err = provider
            .create(resources::ALERTMANAGER, json!({"config_yaml": "route: {}"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let provider = provider_with(Arc::new(RecordingFactory::default()));
        provider
            .configure(json!({"url": "http://localhost:9009"}))
            .await
            .unwrap();
        let err = provider
            .read("mimirtool_dashboard", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
        assert!(provider
            .validate_resource_config("mimirtool_dashboard", json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_plan_destroy_without_configure() {
        let provider = provider_with(Arc::new(RecordingFactory::default()));
        let plan = provider
            .plan(
                resources::ALERTMANAGER,
                Some(json!({"id": "anonymous", "config_yaml": "route: {}"})),
                Value::Null,
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(plan.changes.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_destroy_of_namespace_is_not_a_replace() {
        let provider = provider_with(Arc::new(RecordingFactory::default()));
        let prior = json!({
            "id": "infra",
            "namespace": "infra",
            "config_yaml": "groups: []",
            "strict": false,
            "recording_rule_check": true
        });
        let plan = provider
            .plan(resources::RULER_NAMESPACE, Some(prior), Value::Null, Value::Null)
            .await
            .unwrap();
        assert_eq!(plan.changes.len(), 5);
        assert!(!plan.requires_replace);
        assert!(plan.planned_state.is_null());
    }

    #[test]
    fn test_schema_lists_resources() {
        let provider = provider_with(Arc::new(RecordingFactory::default()));
        let schema = provider.schema();
        assert!(schema.resources.contains_key(resources::RULER_NAMESPACE));
        assert!(schema.resources.contains_key(resources::ALERTMANAGER));
        assert!(schema.provider.attribute("store_rules_sha256").is_some());
        assert!(format!("{:?}", provider).contains("configured: false"));
    }
}
