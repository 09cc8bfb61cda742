//! Resource implementations.
//!
//! Each resource module exposes its schema plus free functions for the
//! lifecycle operations. Everything a resource needs from the provider
//! configuration arrives through [`ResourceContext`].

pub mod alertmanager;
pub mod ruler_namespace;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::client::{ClientError, MimirClient};
use crate::error::ProviderError;
use crate::schema::Schema;

/// Resource type name of [`ruler_namespace`].
pub const RULER_NAMESPACE: &str = "mimirtool_ruler_namespace";

/// Resource type name of [`alertmanager`].
pub const ALERTMANAGER: &str = "mimirtool_alertmanager";

/// Per-configuration context shared by every resource operation.
///
/// Built once by `configure` and immutable afterwards.
#[derive(Clone)]
pub struct ResourceContext {
    /// Client for the Mimir API.
    pub client: Arc<dyn MimirClient>,
    /// Keep only the SHA-256 of rule documents in state.
    pub store_rules_sha256: bool,
    /// Tenant the provider acts for.
    pub tenant_id: Option<String>,
}

impl ResourceContext {
    /// Create a context.
    pub fn new(
        client: Arc<dyn MimirClient>,
        store_rules_sha256: bool,
        tenant_id: Option<String>,
    ) -> Self {
        Self {
            client,
            store_rules_sha256,
            tenant_id,
        }
    }
}

impl fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContext")
            .field("store_rules_sha256", &self.store_rules_sha256)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

/// Schemas of all resources, keyed by type name.
pub fn schemas() -> Vec<(&'static str, Schema)> {
    vec![
        (RULER_NAMESPACE, ruler_namespace::schema()),
        (ALERTMANAGER, alertmanager::schema()),
    ]
}

fn from_state<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::InvalidState(e.to_string()))
}

fn to_state<T: Serialize>(state: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(state)?)
}

/// Map a 404 to `None`.
fn found<T>(result: Result<T, ClientError>) -> Result<Option<T>, ClientError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ClientError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_maps_not_found() {
        assert_eq!(found(Ok::<_, ClientError>(1)).unwrap(), Some(1));
        assert_eq!(
            found::<i32>(Err(ClientError::NotFound("x".to_string()))).unwrap(),
            None
        );
        assert!(found::<i32>(Err(ClientError::ConflictingAuth)).is_err());
    }

    #[test]
    fn test_context_debug_omits_client() {
        let ctx = ResourceContext::new(
            Arc::new(fake::FakeMimir::default()),
            true,
            Some("team-a".to_string()),
        );
        let rendered = format!("{:?}", ctx);
        assert!(rendered.contains("store_rules_sha256: true"));
        assert!(rendered.contains("team-a"));
    }

    #[test]
    fn test_schemas_are_named() {
        let names: Vec<_> = schemas().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec![RULER_NAMESPACE, ALERTMANAGER]);
    }
}
