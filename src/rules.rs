//! Rule-group documents.
//!
//! A ruler namespace is configured with a YAML document of the form
//!
//! ```yaml
//! groups:
//!   - name: cpu
//!     interval: 1m
//!     rules:
//!       - record: instance:cpu_seconds:rate5m
//!         expr: rate(node_cpu_seconds_total[5m])
//! ```
//!
//! This module parses such documents, checks their structure, and derives the
//! form kept in state: the normalized YAML, or its SHA-256 digest.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors found while parsing or checking a rules document.
#[derive(Debug, Error)]
pub enum RulesError {
    /// The document is not valid YAML or has unexpected fields.
    #[error("invalid rules document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A group has an empty name.
    #[error("rule group {index} has no name")]
    EmptyGroupName {
        /// Position of the group in the document.
        index: usize,
    },

    /// Two groups share a name.
    #[error("rule group '{0}' is defined more than once")]
    DuplicateGroup(String),

    /// A rule sets both or neither of `record` and `alert`.
    #[error("rule {index} in group '{group}' must set exactly one of 'record' or 'alert'")]
    RuleKind {
        /// Group name.
        group: String,
        /// Position of the rule in the group.
        index: usize,
    },

    /// A rule has no expression.
    #[error("rule {index} in group '{group}' has an empty 'expr'")]
    EmptyExpr {
        /// Group name.
        group: String,
        /// Position of the rule in the group.
        index: usize,
    },

    /// A recording rule's name is not a valid metric name.
    #[error("invalid recording rule name '{name}' in group '{group}'")]
    InvalidMetricName {
        /// Group name.
        group: String,
        /// The rejected name.
        name: String,
    },

    /// A label or annotation key is not a valid label name.
    #[error("invalid label name '{name}' in group '{group}'")]
    InvalidLabelName {
        /// Group name.
        group: String,
        /// The rejected name.
        name: String,
    },

    /// A recording rule sets a field only alerting rules may have.
    #[error("recording rule '{name}' in group '{group}' must not set '{field}'")]
    RecordingRuleField {
        /// Group name.
        group: String,
        /// Recording rule name.
        name: String,
        /// Offending field.
        field: &'static str,
    },

    /// A duration does not use Prometheus syntax.
    #[error("invalid duration '{value}' for '{field}' in group '{group}'")]
    InvalidDuration {
        /// Group name.
        group: String,
        /// Field holding the duration.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// A whole rules document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesDocument {
    /// Rule groups, in document order.
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

/// A named group of rules evaluated together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleGroup {
    /// Unique within the namespace.
    pub name: String,
    /// Evaluation interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// How far back queries are shifted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_offset: Option<String>,
    /// Older name of `query_offset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_delay: Option<String>,
    /// Tenants queried by federated rule groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_tenants: Vec<String>,
    /// Series or alert limit, 0 for none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A recording or alerting rule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Output series of a recording rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    /// Name of an alerting rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    /// PromQL expression.
    #[serde(default)]
    pub expr: String,
    /// Pending period of an alert.
    #[serde(default, rename = "for", skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    /// How long an alert keeps firing once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_firing_for: Option<String>,
    /// Labels added to results.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Alert annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Which optional checks to run in [`RulesDocument::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Report naming problems as errors instead of warnings.
    pub strict: bool,
    /// Check recording rule names against `level:metric:operations`.
    pub recording_rule_check: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            strict: false,
            recording_rule_check: true,
        }
    }
}

impl RulesDocument {
    /// Parse a document without checking it.
    pub fn parse(yaml: &str) -> Result<Self, RulesError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a document and reject it on the first structural error.
    pub fn parse_checked(yaml: &str) -> Result<Self, RulesError> {
        let doc = Self::parse(yaml)?;
        match doc.structural_errors().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(doc),
        }
    }

    /// Every structural problem in the document.
    pub fn structural_errors(&self) -> Vec<RulesError> {
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();

        for (index, group) in self.groups.iter().enumerate() {
            if group.name.trim().is_empty() {
                errors.push(RulesError::EmptyGroupName { index });
            } else if !seen.insert(group.name.as_str()) {
                errors.push(RulesError::DuplicateGroup(group.name.clone()));
            }
            group.structural_errors(&mut errors);
        }

        errors
    }

    /// Structural errors plus naming checks, as diagnostics.
    pub fn check(&self, options: CheckOptions) -> Vec<Diagnostic> {
        let mut diagnostics: Vec<Diagnostic> = self
            .structural_errors()
            .into_iter()
            .map(|err| Diagnostic::error(err.to_string()).with_attribute("config_yaml"))
            .collect();

        if options.recording_rule_check {
            for group in &self.groups {
                for name in group.rules.iter().filter_map(|r| r.record.as_deref()) {
                    if follows_recording_convention(name) {
                        continue;
                    }
                    let summary = format!(
                        "recording rule name '{}' in group '{}' does not match level:metric:operation format",
                        name, group.name
                    );
                    let diag = if options.strict {
                        Diagnostic::error(summary)
                    } else {
                        Diagnostic::warning(summary)
                    };
                    diagnostics.push(
                        diag.with_detail("Recording rule names must contain at least two colons")
                            .with_attribute("config_yaml"),
                    );
                }
            }
        }

        diagnostics
    }

    /// Group names in the document.
    pub fn group_names(&self) -> BTreeSet<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    /// The document with groups sorted by name, re-serialized.
    pub fn normalized(&self) -> Result<String, RulesError> {
        let mut groups = self.groups.clone();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(serde_yaml::to_string(&RulesDocument { groups })?)
    }

    /// The value stored in state for this document.
    pub fn state_form(&self, store_sha256: bool) -> Result<String, RulesError> {
        let normalized = self.normalized()?;
        if store_sha256 {
            Ok(sha256_hex(&normalized))
        } else {
            Ok(normalized)
        }
    }
}

impl RuleGroup {
    fn structural_errors(&self, errors: &mut Vec<RulesError>) {
        let group = &self.name;
        let durations = [
            ("interval", &self.interval),
            ("query_offset", &self.query_offset),
            ("evaluation_delay", &self.evaluation_delay),
        ];
        for (field, value) in durations {
            check_duration(group, field, value, errors);
        }

        for (index, rule) in self.rules.iter().enumerate() {
            match (&rule.record, &rule.alert) {
                (Some(record), None) => {
                    if !is_metric_name(record) {
                        errors.push(RulesError::InvalidMetricName {
                            group: group.clone(),
                            name: record.clone(),
                        });
                    }
                    let alert_only = [
                        ("for", rule.for_duration.is_some()),
                        ("keep_firing_for", rule.keep_firing_for.is_some()),
                        ("annotations", !rule.annotations.is_empty()),
                    ];
                    for (field, set) in alert_only {
                        if set {
                            errors.push(RulesError::RecordingRuleField {
                                group: group.clone(),
                                name: record.clone(),
                                field,
                            });
                        }
                    }
                }
                (None, Some(_)) => {
                    check_duration(group, "for", &rule.for_duration, errors);
                    check_duration(group, "keep_firing_for", &rule.keep_firing_for, errors);
                }
                _ => errors.push(RulesError::RuleKind {
                    group: group.clone(),
                    index,
                }),
            }

            if rule.expr.trim().is_empty() {
                errors.push(RulesError::EmptyExpr {
                    group: group.clone(),
                    index,
                });
            }

            for name in rule.labels.keys().chain(rule.annotations.keys()) {
                if !is_label_name(name) {
                    errors.push(RulesError::InvalidLabelName {
                        group: group.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
    }
}

fn check_duration(
    group: &str,
    field: &'static str,
    value: &Option<String>,
    errors: &mut Vec<RulesError>,
) {
    if let Some(value) = value {
        if !is_prometheus_duration(value) {
            errors.push(RulesError::InvalidDuration {
                group: group.to_string(),
                field,
                value: value.clone(),
            });
        }
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Recording rules are named `level:metric:operations`.
pub fn follows_recording_convention(name: &str) -> bool {
    name.matches(':').count() >= 2
}

/// Prometheus duration syntax: `0`, or units `y w d h m s ms` each at most
/// once and in that order, e.g. `1h30m`.
pub fn is_prometheus_duration(value: &str) -> bool {
    const UNITS: [&str; 7] = ["y", "w", "d", "h", "m", "s", "ms"];

    if value == "0" {
        return true;
    }
    if value.is_empty() {
        return false;
    }

    let mut rest = value;
    let mut next_unit = 0;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let unit = &rest[..unit_len];
        match UNITS[next_unit..].iter().position(|u| *u == unit) {
            Some(pos) => next_unit += pos + 1,
            None => return false,
        }
        rest = &rest[unit_len..];
    }
    true
}
