//! Secret definitions
//!
//! A store maps secret names to the scope a job must hold and to where the
//! value comes from. It is usually loaded from YAML:
//!
//! ```yaml
//! REGISTRY_TOKEN:
//!   scope: packages:write
//!   env: QUAY_TOKEN
//! SIGNING_KEY:
//!   scope: signing:write
//!   file: /run/secrets/cosign.key
//! ```
//!
//! Values are only read when a job resolves them through the broker.

use anyhow::{Context, Result};
use keel_core::domain::permission::Scope;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a secret's value is read from
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    /// Environment variable of the runner process
    Env(String),
    /// Inline value
    Value(String),
    /// File whose contents, minus a trailing newline, are the value
    File(PathBuf),
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::Env(name) => f.debug_tuple("Env").field(name).finish(),
            SecretSource::Value(_) => f.write_str("Value([REDACTED])"),
            SecretSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecretDefinition {
    /// Scope the caller's permissions must grant
    pub scope: Scope,
    #[serde(flatten)]
    pub source: SecretSource,
}

impl SecretDefinition {
    pub fn new(scope: Scope, source: SecretSource) -> Self {
        Self { scope, source }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    secrets: BTreeMap<String, SecretDefinition>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, definition: SecretDefinition) -> Self {
        self.secrets.insert(name.into(), definition);
        self
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        let secrets: Option<BTreeMap<String, SecretDefinition>> =
            serde_yaml::from_str(source).context("Invalid secret store YAML")?;
        Ok(Self {
            secrets: secrets.unwrap_or_default(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secret store {}", path.display()))?;
        Self::from_yaml(&source).with_context(|| format!("In {}", path.display()))
    }

    pub fn get(&self, name: &str) -> Option<&SecretDefinition> {
        self.secrets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Runner variables that hold secret values
    ///
    /// These must never be passed through to step environments.
    pub fn source_env_vars(&self) -> Vec<String> {
        self.secrets
            .values()
            .filter_map(|definition| match &definition.source {
                SecretSource::Env(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::permission::Access;

    const STORE: &str = r#"
REGISTRY_TOKEN:
  scope: packages:write
  env: QUAY_TOKEN
WEBHOOK:
  scope: notify:read
  value: https://hooks.example.com/abc
SIGNING_KEY:
  scope: signing:write
  file: /run/secrets/cosign.key
"#;

    #[test]
    fn test_store_from_yaml() {
        let store = SecretStore::from_yaml(STORE).unwrap();
        assert_eq!(store.len(), 3);

        let token = store.get("REGISTRY_TOKEN").unwrap();
        assert_eq!(token.scope, Scope::new("packages", Access::Write));
        assert_eq!(token.source, SecretSource::Env("QUAY_TOKEN".to_string()));

        let key = store.get("SIGNING_KEY").unwrap();
        assert_eq!(
            key.source,
            SecretSource::File(PathBuf::from("/run/secrets/cosign.key"))
        );

        assert_eq!(store.source_env_vars(), vec!["QUAY_TOKEN"]);
    }

    #[test]
    fn test_empty_store() {
        assert!(SecretStore::from_yaml("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let yaml = "TOKEN:\n  scope: packages\n  value: abcdef\n";
        assert!(SecretStore::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_debug_hides_inline_values() {
        let store = SecretStore::from_yaml(STORE).unwrap();
        let debug = format!("{:?}", store);
        assert!(!debug.contains("hooks.example.com"));
        assert!(debug.contains("[REDACTED]"));
    }
}
