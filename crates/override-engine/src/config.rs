//! Engine settings and rule file loading.

use crate::rule::{
    validate_rules, Action, DelayAction, Patch, PatchAction, ResponseContent, Rule, RuleError,
    RuleMatcher, SyntheticAction, UrlPattern,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported rule file extension '{0}' (expected .json, .yaml or .yml)")]
    UnsupportedFormat(String),

    #[error(transparent)]
    InvalidRule(#[from] RuleError),
}

/// Tunables of the interception engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// Delay before the late-install check for client libraries and re-wrapped fetch
    pub deferred_check_ms: u64,
    /// Add `marker_header` to synthesized responses
    pub mark_responses: bool,
    pub marker_header: String,
    pub marker_value: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            deferred_check_ms: 100,
            mark_responses: false,
            marker_header: "X-Modified-By".to_string(),
            marker_value: "override-engine".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFileFormat {
    Json,
    Yaml,
}

impl RuleFileFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(RuleFileFormat::Json),
            "yaml" | "yml" => Ok(RuleFileFormat::Yaml),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A rule list as stored on disk.
///
/// Accepts a bare array of rules, a full document, or the rule store's
/// export envelope (`{rules, exportDate, version}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_date: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for RuleFile {
    fn default() -> Self {
        Self {
            version: None,
            enabled: true,
            settings: EngineSettings::default(),
            rules: Vec::new(),
            export_date: None,
        }
    }
}

impl RuleFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = RuleFileFormat::from_path(path)?;
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, format)
    }

    /// Parse and validate.
    pub fn parse(contents: &str, format: RuleFileFormat) -> Result<Self, ConfigError> {
        let value: Value = match format {
            RuleFileFormat::Json => serde_json::from_str(contents)?,
            RuleFileFormat::Yaml => serde_yaml::from_str(contents)?,
        };

        let file = match value {
            Value::Array(_) => RuleFile {
                rules: serde_json::from_value(value)?,
                ..Default::default()
            },
            other => serde_json::from_value(other)?,
        };

        validate_rules(&file.rules)?;
        Ok(file)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// A small rule set covering each action type.
    pub fn example() -> Self {
        let rule = |id: &str, name: &str, url: UrlPattern, method: Option<&str>, action| Rule {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            matcher: RuleMatcher {
                url: Some(url),
                method: method.map(str::to_string),
            },
            action,
        };

        RuleFile {
            version: Some(json!("1.0")),
            rules: vec![
                rule(
                    "ping-down",
                    "Ping returns 503",
                    UrlPattern::exact("https://api.example.com/ping"),
                    None,
                    Action::Status(
                        SyntheticAction::new(ResponseContent::Json(json!({"error": "unavailable"})))
                            .with_status(503),
                    ),
                ),
                rule(
                    "mock-api",
                    "Mock API reads",
                    UrlPattern::prefix("https://api.example.com/api/"),
                    Some("GET"),
                    Action::Replace(
                        SyntheticAction::new(ResponseContent::Json(json!({"ok": true})))
                            .with_header("Cache-Control", "no-store"),
                    ),
                ),
                rule(
                    "rename-user",
                    "Patch profile name",
                    UrlPattern::regex(r"/users/\d+$", Some("i")),
                    None,
                    Action::Patch(PatchAction {
                        patches: vec![Patch::new("profile.name", json!("Test User"))],
                        ..Default::default()
                    }),
                ),
                rule(
                    "slow-assets",
                    "Slow static assets",
                    UrlPattern::regex(r"\.(js|css)$", None),
                    None,
                    Action::Delay(DelayAction { delay: 1500 }),
                ),
            ],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_settings_defaults() {
        let settings: EngineSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.deferred_check_ms, 100);
        assert!(!settings.mark_responses);
        assert_eq!(settings.marker_header, "X-Modified-By");
    }

    #[test]
    fn test_parse_bare_array() {
        let file = RuleFile::parse(
            r#"[{"id":"a","name":"A","matcher":{"url":{"type":"prefix","value":"/api/"}},
                 "action":{"type":"delay","delay":10}}]"#,
            RuleFileFormat::Json,
        )
        .unwrap();
        assert!(file.enabled);
        assert_eq!(file.rules.len(), 1);
    }

    #[test]
    fn test_parse_export_envelope() {
        let file = RuleFile::parse(
            r#"{"rules":[{"id":"a","name":"A","enabled":false,
                 "matcher":{"url":{"type":"exact","value":"/x"}},
                 "action":{"type":"status","statusCode":404}}],
                "exportDate":"2024-01-01T00:00:00.000Z","version":"1.0"}"#,
            RuleFileFormat::Json,
        )
        .unwrap();
        assert_eq!(file.export_date.as_deref(), Some("2024-01-01T00:00:00.000Z"));
        assert!(!file.rules[0].enabled);
    }

    #[test]
    fn test_parse_yaml_document() {
        let yaml = r#"
enabled: false
settings:
  deferredCheckMs: 250
  markResponses: true
rules:
  - id: ping
    name: ping
    matcher:
      url: { type: exact, value: "https://api.x/ping" }
    action:
      type: status
      statusCode: 503
"#;
        let file = RuleFile::parse(yaml, RuleFileFormat::Yaml).unwrap();
        assert!(!file.enabled);
        assert_eq!(file.settings.deferred_check_ms, 250);
        assert!(file.settings.mark_responses);
        assert_eq!(file.rules[0].id, "ping");
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let err = RuleFile::parse(
            r#"[{"id":"a","name":"A","matcher":{},"action":{"type":"patch","patches":[]}}]"#,
            RuleFileFormat::Json,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule(RuleError::EmptyPatches(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{}", RuleFile::example().to_json().unwrap()).unwrap();

        let loaded = RuleFile::load(file.path()).unwrap();
        assert_eq!(loaded.rules.len(), 4);
        assert_eq!(loaded, RuleFile::example());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = RuleFile::load("rules.toml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "toml"));
    }

    #[test]
    fn test_example_round_trips_through_yaml() {
        let yaml = RuleFile::example().to_yaml().unwrap();
        let parsed = RuleFile::parse(&yaml, RuleFileFormat::Yaml).unwrap();
        assert_eq!(parsed, RuleFile::example());
    }
}
