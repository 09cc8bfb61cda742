//! Convenience types for provider implementations.
//!
//! These types provide a more ergonomic API over the raw protobuf types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Schema;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if removing).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

impl From<crate::generated::AttributeChange> for AttributeChange {
    fn from(proto: crate::generated::AttributeChange) -> Self {
        Self {
            path: proto.path,
            before: decode_optional(&proto.before),
            after: decode_optional(&proto.after),
        }
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: encode_optional(change.before.as_ref()),
            after: encode_optional(change.after.as_ref()),
        }
    }
}

fn decode_optional(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(bytes).ok()
    }
}

fn encode_optional(value: Option<&Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(v).ok())
        .unwrap_or_default()
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Diff `planned` against `prior` attribute by attribute.
    ///
    /// Without a prior state every non-null planned attribute is an addition.
    /// A change to a `force_new` attribute of an existing resource requires
    /// replacement, unless `planned` is null (destroy).
    pub fn diff(schema: &Schema, prior: Option<&Value>, planned: Value) -> Self {
        let mut changes = Vec::new();
        let mut requires_replace = false;
        let destroy = planned.is_null();

        for (name, attr) in &schema.attributes {
            let after = planned.get(name).filter(|v| !v.is_null());
            let before = prior.and_then(|p| p.get(name)).filter(|v| !v.is_null());
            match (before, after) {
                (None, None) => {}
                (Some(b), Some(a)) if b == a => {}
                (None, Some(a)) => changes.push(AttributeChange::added(name.as_str(), a.clone())),
                (Some(b), None) => changes.push(AttributeChange::removed(name.as_str(), b.clone())),
                (Some(b), Some(a)) => {
                    changes.push(AttributeChange::modified(name.as_str(), b.clone(), a.clone()))
                }
            }
            if attr.force_new && !destroy && prior.is_some() && before != after {
                requires_replace = true;
            }
        }

        Self::with_changes(planned, changes, requires_replace)
    }

    /// Whether the plan changes anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
}

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix printed on stdout at startup.
pub const HANDSHAKE_PREFIX: &str = "MIMIRTOOL_PROVIDER";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("namespace", Attribute::required_string().with_force_new())
            .with_attribute("config_yaml", Attribute::required_string())
    }

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("namespace", json!("infra"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("infra")));

        let removed = AttributeChange::removed("namespace", json!("old"));
        assert_eq!(removed.before, Some(json!("old")));
        assert!(removed.after.is_none());
    }

    #[test]
    fn test_attribute_change_conversion() {
        let change = AttributeChange::modified("config_yaml", json!("a"), json!("b"));

        let proto: crate::generated::AttributeChange = change.clone().into();
        assert_eq!(proto.path, "config_yaml");

        let back: AttributeChange = proto.into();
        assert_eq!(back, change);

        let added: crate::generated::AttributeChange =
            AttributeChange::added("id", json!("x")).into();
        assert!(added.before.is_empty());
    }

    #[test]
    fn test_diff_create() {
        let plan = PlanResult::diff(
            &schema(),
            None,
            json!({"namespace": "infra", "config_yaml": "groups: []", "id": null}),
        );
        assert_eq!(plan.changes.len(), 2);
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_diff_no_change() {
        let state = json!({"id": "infra", "namespace": "infra", "config_yaml": "groups: []"});
        let plan = PlanResult::diff(&schema(), Some(&state), state.clone());
        assert!(!plan.has_changes());
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_diff_force_new() {
        let prior = json!({"id": "infra", "namespace": "infra", "config_yaml": "groups: []"});
        let planned = json!({"id": "infra", "namespace": "platform", "config_yaml": "groups: []"});
        let plan = PlanResult::diff(&schema(), Some(&prior), planned);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "namespace");
        assert!(plan.requires_replace);
    }

    #[test]
    fn test_diff_destroy_does_not_replace() {
        let prior = json!({"id": "infra", "namespace": "infra", "config_yaml": "groups: []"});
        let plan = PlanResult::diff(&schema(), Some(&prior), Value::Null);
        assert_eq!(plan.changes.len(), 3);
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_diff_in_place_update() {
        let prior = json!({"id": "infra", "namespace": "infra", "config_yaml": "a"});
        let planned = json!({"id": "infra", "namespace": "infra", "config_yaml": "b"});
        let plan = PlanResult::diff(&schema(), Some(&prior), planned);
        assert_eq!(
            plan.changes,
            vec![AttributeChange::modified("config_yaml", json!("a"), json!("b"))]
        );
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(PROTOCOL_VERSION, 1);
        assert_eq!(HANDSHAKE_PREFIX, "MIMIRTOOL_PROVIDER");
    }
}
