//! The `PluginSpecError` taxonomy: manifest validation failures classified
//! by kind, each naming the offending JSON path.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSpecError {
    /// A value's JSON type didn't match the schema (e.g. a string where an
    /// array was required).
    Type { path: String, expected: String },
    /// A required property was absent.
    Missing { path: String, property: String },
    /// Two properties that may not coexist both appeared (`uploader` and
    /// `uploaders`).
    Exclusive { path: String, a: String, b: String },
    /// A property not named by the schema appeared where
    /// `additionalProperties: false` applies.
    Additional { path: String, property: String },
    /// An array required to be non-empty was empty.
    MinItems { path: String, min: usize },
    /// A value fell outside its enumerated set.
    Enum { path: String, allowed: Vec<String> },
}

impl fmt::Display for PluginSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginSpecError::Type { path, expected } => {
                write!(f, "{path}: expected type {expected}")
            }
            PluginSpecError::Missing { path, property } => {
                write!(f, "{path}: missing required property {property:?}")
            }
            PluginSpecError::Exclusive { path, a, b } => {
                write!(f, "{path}: {a:?} and {b:?} are mutually exclusive")
            }
            PluginSpecError::Additional { path, property } => {
                write!(f, "{path}: unknown property {property:?}")
            }
            PluginSpecError::MinItems { path, min } => {
                write!(f, "{path}: expected at least {min} item(s)")
            }
            PluginSpecError::Enum { path, allowed } => {
                write!(f, "{path}: value not in {allowed:?}")
            }
        }
    }
}

impl std::error::Error for PluginSpecError {}

/// A manifest's full set of validation failures: every violation is
/// reported rather than stopping at the first.
#[derive(Debug, Default)]
pub struct PluginSpecErrors(pub Vec<PluginSpecError>);

impl fmt::Display for PluginSpecErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PluginSpecErrors {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("manifest failed validation:\n{0}")]
    Invalid(#[from] PluginSpecErrors),
    #[error("manifest is neither valid JSON nor valid YAML")]
    Unparseable(#[source] anyhow::Error),
    #[error("plugin directory has neither a manifest nor an importable package")]
    NoRecognizablePlugin,
    #[error("plugin host error")]
    Host(#[source] anyhow::Error),
    #[error("hub-db error")]
    Db(#[source] anyhow::Error),
    #[error("I/O error")]
    Io(#[source] std::io::Error),
}
