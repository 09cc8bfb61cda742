//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` against a [`Schema`], including the
//! per-attribute [`ValueValidator`]s.
//!
//! # Example
//!
//! ```
//! use mimirtool_provider::schema::{Attribute, Schema, ValueValidator};
//! use mimirtool_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("url", Attribute::required_string().with_validator(ValueValidator::HttpUrl));
//!
//! assert!(validate(&schema, &json!({"url": "https://mimir.example.com"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"url": "mimir.example.com"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("url".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema, ValueValidator};
use serde_json::Value;

/// Validate a JSON object against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Validators run on values of the right type
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            // A null root is an empty config; only required attributes can fail.
            for (name, attr) in &schema.attributes {
                validate_attribute(name, attr, None, &mut diagnostics);
            }
            return diagnostics;
        }
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        }
    };

    for (name, attr) in &schema.attributes {
        validate_attribute(name, attr, obj.get(name), &mut diagnostics);
    }

    for key in obj.keys() {
        if !schema.attributes.contains_key(key) {
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", key))
                    .with_detail("This attribute is not declared in the schema")
                    .with_attribute(key.as_str()),
            );
        }
    }

    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether `candidate` is an absolute `http`/`https` URL with a host.
pub fn is_http_url(candidate: &str) -> bool {
    match url::Url::parse(candidate) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

fn validate_attribute(
    name: &str,
    attr: &Attribute,
    value: Option<&Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                let detail = match attr.env_vars.first() {
                    Some(env) => format!(
                        "This attribute is required; set it in configuration or via the `{}` environment variable",
                        env
                    ),
                    None => "This attribute is required and must be provided".to_string(),
                };
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", name))
                        .with_detail(detail)
                        .with_attribute(name),
                );
            }
        }
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, name, diagnostics);
            if diagnostics.len() == before {
                if let Some(validator) = attr.validator {
                    run_validator(validator, v, name, diagnostics);
                }
            }
        }
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        AttributeType::Map(value_type) => match value.as_object() {
            Some(obj) => {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            }
            None => diagnostics.push(type_error(path, "map", value)),
        },
    }
}

fn run_validator(
    validator: ValueValidator,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(s) = value.as_str() else {
        return;
    };
    match validator {
        ValueValidator::HttpUrl => {
            if !is_http_url(s) {
                diagnostics.push(
                    Diagnostic::error(format!("Invalid URL for attribute '{}'", path))
                        .with_detail("Expected an absolute URL with an http or https scheme")
                        .with_attribute(path),
                );
            }
        }
        ValueValidator::NonEmpty => {
            if s.trim().is_empty() {
                diagnostics.push(
                    Diagnostic::error(format!("Attribute '{}' must not be empty", path))
                        .with_attribute(path),
                );
            }
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// Only the type name goes into the detail: the value may be sensitive.
fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("http://localhost:8080" ; "http with port")]
    #[test_case("https://mimir.example.com" ; "https host")]
    #[test_case("https://mimir.example.com/prometheus" ; "https with path")]
    #[test_case("http://10.0.0.1" ; "ip address")]
    fn test_http_url_accepted(candidate: &str) {
        assert!(is_http_url(candidate));
    }

    #[test_case("" ; "empty")]
    #[test_case("mimir.example.com" ; "missing scheme")]
    #[test_case("ftp://mimir.example.com" ; "wrong scheme")]
    #[test_case("https://" ; "missing host")]
    #[test_case("not a url" ; "free text")]
    #[test_case("/prometheus" ; "relative path")]
    fn test_http_url_rejected(candidate: &str) {
        assert!(!is_http_url(candidate));
    }

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("namespace", Attribute::required_string());

        assert!(validate(&schema, &json!({"namespace": "infra"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("namespace".to_string()));

        let diagnostics = validate(&schema, &json!({"namespace": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"namespace": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_missing_required_mentions_env_var() {
        let schema = Schema::v0()
            .with_attribute("url", Attribute::required_string().with_env("MIMIR_ADDRESS"));
        let diagnostics = validate(&schema, &Value::Null);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0]
            .detail
            .as_deref()
            .is_some_and(|d| d.contains("MIMIR_ADDRESS")));
    }

    #[test]
    fn test_validator_runs_after_type_check() {
        let schema = Schema::v0().with_attribute(
            "url",
            Attribute::required_string().with_validator(ValueValidator::HttpUrl),
        );

        // Wrong type reports once, not twice
        let diagnostics = validate(&schema, &json!({"url": 42}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));

        let diagnostics = validate(&schema, &json!({"url": "localhost"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid URL"));
    }

    #[test]
    fn test_non_empty_validator() {
        let schema = Schema::v0().with_attribute(
            "config_yaml",
            Attribute::required_string().with_validator(ValueValidator::NonEmpty),
        );
        assert!(validate(&schema, &json!({"config_yaml": "groups: []"})).is_empty());
        assert_eq!(validate(&schema, &json!({"config_yaml": "   "})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_string());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"id": 123})).is_empty());
    }

    #[test]
    fn test_validate_string_map() {
        let schema = Schema::v0().with_attribute("templates", Attribute::optional_string_map());

        assert!(validate(&schema, &json!({"templates": {"a.tmpl": "{{ define \"a\" }}{{ end }}"}}))
            .is_empty());

        let diagnostics = validate(&schema, &json!({"templates": {"a.tmpl": 1}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("templates.a.tmpl".to_string()));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let schema = Schema::v0().with_attribute("url", Attribute::optional_string());
        let diagnostics = validate(&schema, &json!({"adress": "http://x"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("adress"));
    }

    #[test]
    fn test_sensitive_value_not_echoed() {
        let schema = Schema::v0().with_attribute("key", Attribute::optional_string().sensitive());
        let diagnostics = validate(&schema, &json!({"key": 1234567}));
        assert_eq!(diagnostics.len(), 1);
        let rendered = format!("{:?}", diagnostics[0]);
        assert!(!rendered.contains("1234567"));
    }

    #[test]
    fn test_validate_result_helper() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate_result(&schema, &json!({"name": "test"})).is_ok());

        let result = validate_result(&schema, &json!({}));
        assert_eq!(result.unwrap_err().len(), 1);
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }
}
