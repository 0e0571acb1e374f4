//! Manifest shape and JSON-schema validation.

use crate::error::{PluginSpecError, PluginSpecErrors};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `dumper.data_url` accepts one URL or many of the same scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn as_slice(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(s) => vec![s.as_str()],
            OneOrMany::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// The URL scheme a dumper's `data_url` resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Ftp,
    Docker,
    Git,
    Local,
}

impl Protocol {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" | "https" => Some(Protocol::Http),
            "ftp" => Some(Protocol::Ftp),
            "docker" => Some(Protocol::Docker),
            "git" => Some(Protocol::Git),
            "file" => Some(Protocol::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDumper {
    pub data_url: OneOrMany,
    pub release: Option<String>,
    pub schedule: Option<String>,
    #[serde(default)]
    pub uncompress: bool,
    #[serde(default)]
    pub disabled: bool,
    pub class: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnDuplicates {
    Error,
    Ignore,
    Merge,
}

impl From<OnDuplicates> for hub_storage::OnDuplicates {
    fn from(v: OnDuplicates) -> Self {
        match v {
            OnDuplicates::Error => hub_storage::OnDuplicates::Error,
            OnDuplicates::Ignore => hub_storage::OnDuplicates::Ignore,
            OnDuplicates::Merge => hub_storage::OnDuplicates::Merge,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestUploader {
    /// Only present in the `uploaders` array form; distinguishes
    /// sub-sources.
    pub name: Option<String>,
    pub parser: String,
    pub parser_kwargs: Option<Value>,
    #[serde(default = "default_on_duplicates")]
    pub on_duplicates: OnDuplicates,
    pub keylookup: Option<Value>,
    pub parallelizer: Option<String>,
    pub mapping: Option<String>,
}

fn default_on_duplicates() -> OnDuplicates {
    OnDuplicates::Error
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub display_name: Option<String>,
    pub biothing_type: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    pub dumper: Option<ManifestDumper>,
    pub uploader: Option<ManifestUploader>,
    pub uploaders: Option<Vec<ManifestUploader>>,
}

impl Manifest {
    /// Returns every uploader entry, whichever of the two forms was used.
    pub fn uploader_entries(&self) -> Vec<&ManifestUploader> {
        if let Some(u) = &self.uploader {
            vec![u]
        } else if let Some(list) = &self.uploaders {
            list.iter().collect()
        } else {
            Vec::new()
        }
    }
}

/// The manifest's JSON-schema, covering the structural constraints: at
/// least one of `dumper`/`uploader`/`uploaders`, `on_duplicates`'s enum,
/// `data_url`'s non-empty-array-or-string shape.
const SCHEMA: &str = r#"
{
  "type": "object",
  "additionalProperties": false,
  "properties": {
    "display_name": { "type": "string" },
    "biothing_type": { "type": "string" },
    "requires": { "type": "array", "items": { "type": "string" } },
    "dumper": {
      "type": "object",
      "additionalProperties": false,
      "required": ["data_url"],
      "properties": {
        "data_url": {
          "oneOf": [
            { "type": "string" },
            { "type": "array", "items": { "type": "string" }, "minItems": 1 }
          ]
        },
        "release": { "type": "string" },
        "schedule": { "type": "string" },
        "uncompress": { "type": "boolean" },
        "disabled": { "type": "boolean" },
        "class": { "type": "string" }
      }
    },
    "uploader": { "$ref": "#/$defs/uploader" },
    "uploaders": {
      "type": "array",
      "minItems": 1,
      "items": { "$ref": "#/$defs/uploader" }
    }
  },
  "$defs": {
    "uploader": {
      "type": "object",
      "additionalProperties": false,
      "required": ["parser"],
      "properties": {
        "name": { "type": "string" },
        "parser": { "type": "string" },
        "parser_kwargs": {},
        "on_duplicates": { "enum": ["error", "ignore", "merge"] },
        "keylookup": {},
        "parallelizer": { "type": "string" },
        "mapping": { "type": "string" }
      }
    }
  }
}
"#;

/// Validates `instance` against the manifest schema and the mutual-
/// exclusivity rule `jsonschema` cannot express structurally, collecting
/// every violation rather than stopping at the first.
pub fn validate(instance: &Value) -> Result<(), PluginSpecErrors> {
    let schema: Value = serde_json::from_str(SCHEMA).expect("manifest schema is valid JSON");
    let validator = jsonschema::validator_for(&schema).expect("manifest schema compiles");

    let mut errors = Vec::new();
    if let jsonschema::BasicOutput::Invalid(units) = validator.apply(instance).basic() {
        for unit in units.iter() {
            errors.push(classify(&unit.error_description().to_string(), &unit.instance_location().to_string()));
        }
    }

    if instance.get("uploader").is_some() && instance.get("uploaders").is_some() {
        errors.push(PluginSpecError::Exclusive {
            path: "/".to_string(),
            a: "uploader".to_string(),
            b: "uploaders".to_string(),
        });
    }
    if instance.get("dumper").is_none()
        && instance.get("uploader").is_none()
        && instance.get("uploaders").is_none()
    {
        errors.push(PluginSpecError::Missing {
            path: "/".to_string(),
            property: "dumper|uploader|uploaders".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PluginSpecErrors(errors))
    }
}

/// Classifies a `jsonschema` basic-output unit into the `PluginSpecError`
/// taxonomy. `jsonschema`'s basic output carries only a human-readable
/// description and the failing instance path, not a structured error
/// kind, so classification matches on the description's well-known
/// phrasing (stable across the draft validators `jsonschema` implements).
fn classify(description: &str, path: &str) -> PluginSpecError {
    let path = path.to_string();
    if description.contains("is not of type") {
        return PluginSpecError::Type {
            path,
            expected: description.to_string(),
        };
    }
    if let Some(prop) = description
        .strip_suffix(" is a required property")
        .map(|s| s.trim_matches('"').to_string())
    {
        return PluginSpecError::Missing { path, property: prop };
    }
    if description.starts_with("Additional properties are not allowed") {
        return PluginSpecError::Additional {
            path,
            property: description.to_string(),
        };
    }
    if description.contains("is too short")
        || description.contains("does not contain enough items")
        || description.contains("has less than")
    {
        return PluginSpecError::MinItems { path, min: 1 };
    }
    if description.contains("is not one of") || description.contains("is not valid under any of the given schemas") {
        return PluginSpecError::Enum {
            path,
            allowed: vec![description.to_string()],
        };
    }
    PluginSpecError::Type {
        path,
        expected: description.to_string(),
    }
}

/// Parses raw manifest bytes as JSON first, falling back to YAML: a
/// plugin's data folder contains `manifest.json` or `manifest.yaml`.
pub fn parse_raw(bytes: &[u8]) -> anyhow::Result<Value> {
    if let Ok(v) = serde_json::from_slice::<Value>(bytes) {
        return Ok(v);
    }
    Ok(serde_yaml::from_slice::<Value>(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_manifest_passes() {
        let v = json!({
            "dumper": { "data_url": "https://example.com/data.tsv" },
            "uploader": { "parser": "parser:load", "on_duplicates": "merge" }
        });
        assert!(validate(&v).is_ok());
    }

    #[test]
    fn missing_parser_is_a_missing_error() {
        let v = json!({
            "dumper": { "data_url": "https://example.com/data.tsv" },
            "uploader": { "on_duplicates": "merge" }
        });
        let errs = validate(&v).unwrap_err();
        assert!(errs
            .0
            .iter()
            .any(|e| matches!(e, PluginSpecError::Missing { property, .. } if property == "parser")));
    }

    #[test]
    fn uploader_and_uploaders_together_is_exclusive_error() {
        let v = json!({
            "uploader": { "parser": "a:b" },
            "uploaders": [{ "parser": "a:b", "name": "x" }]
        });
        let errs = validate(&v).unwrap_err();
        assert!(errs.0.iter().any(|e| matches!(e, PluginSpecError::Exclusive { .. })));
    }

    #[test]
    fn bad_on_duplicates_is_an_enum_error() {
        let v = json!({
            "uploader": { "parser": "a:b", "on_duplicates": "explode" }
        });
        let errs = validate(&v).unwrap_err();
        assert!(errs.0.iter().any(|e| matches!(e, PluginSpecError::Enum { .. })));
    }

    #[test]
    fn empty_uploaders_array_is_min_items_error() {
        let v = json!({ "uploaders": [] });
        let errs = validate(&v).unwrap_err();
        assert!(errs.0.iter().any(|e| matches!(e, PluginSpecError::MinItems { .. })));
    }
}
