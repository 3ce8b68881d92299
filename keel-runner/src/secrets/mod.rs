//! Credential broker
//!
//! Resolves secrets for a job against the job's declared permissions. Every
//! failure is closed: a job that cannot get all of its secrets runs no step.
//! Resolved values live in [`SecretValue`]s, which zero their memory on drop
//! and never print their contents.

mod redact;
mod store;

pub use redact::{MIN_SECRET_LENGTH, REDACTED_PLACEHOLDER, Redactor};
pub use store::{SecretDefinition, SecretSource, SecretStore};

use keel_core::domain::permission::{Permissions, Scope};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Access to secret '{secret}' denied: requires scope '{scope}'")]
    Denied { secret: String, scope: Scope },

    #[error("Secret '{0}' is not defined")]
    NotFound(String),

    #[error("Secret '{secret}' is unavailable: {reason}")]
    Unavailable { secret: String, reason: String },

    #[error("Secret '{0}' is shorter than {min} characters", min = MIN_SECRET_LENGTH)]
    TooShort(String),
}

/// A resolved secret value
///
/// `Debug` and `Display` print `[REDACTED]`; use [`expose`](Self::expose) to
/// read the value.
#[derive(Clone)]
pub struct SecretValue {
    inner: SecretString,
}

impl SecretValue {
    pub fn new(value: String) -> Self {
        Self {
            inner: SecretString::from(value),
        }
    }

    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED_PLACEHOLDER)
    }
}

impl std::fmt::Display for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED_PLACEHOLDER)
    }
}

/// Secrets resolved for one job
#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    values: BTreeMap<String, SecretValue>,
}

impl ResolvedSecrets {
    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Redactor covering every value in this set
    pub fn redactor(&self) -> Redactor {
        Redactor::new(self.values.values().map(SecretValue::expose))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CredentialBroker {
    store: Arc<SecretStore>,
}

impl CredentialBroker {
    pub fn new(store: SecretStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// Resolves one secret for a caller holding `permissions`
    pub fn resolve(&self, name: &str, permissions: &Permissions) -> Result<SecretValue, BrokerError> {
        let definition = self.store.get(name).ok_or_else(|| {
            warn!("Secret '{}' requested but not defined", name);
            BrokerError::NotFound(name.to_string())
        })?;

        if !permissions.grants(&definition.scope) {
            warn!(
                "Denied secret '{}': caller lacks scope '{}'",
                name, definition.scope
            );
            return Err(BrokerError::Denied {
                secret: name.to_string(),
                scope: definition.scope.clone(),
            });
        }

        let unavailable = |reason: String| BrokerError::Unavailable {
            secret: name.to_string(),
            reason,
        };

        let value = match &definition.source {
            SecretSource::Value(value) => value.clone(),
            SecretSource::Env(var) => std::env::var(var)
                .map_err(|_| unavailable(format!("environment variable '{}' is not set", var)))?,
            SecretSource::File(path) => std::fs::read_to_string(path)
                .map(|contents| contents.trim_end_matches(['\r', '\n']).to_string())
                .map_err(|e| unavailable(format!("cannot read {}: {}", path.display(), e)))?,
        };

        if value.len() < MIN_SECRET_LENGTH {
            warn!("Secret '{}' is too short to be redacted safely", name);
            return Err(BrokerError::TooShort(name.to_string()));
        }

        debug!("Resolved secret '{}' (scope '{}')", name, definition.scope);
        Ok(SecretValue::new(value))
    }

    /// Resolves every name, failing on the first one that cannot be resolved
    pub fn resolve_all<'a, I>(
        &self,
        names: I,
        permissions: &Permissions,
    ) -> Result<ResolvedSecrets, BrokerError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let values = names
            .into_iter()
            .map(|name| Ok((name.clone(), self.resolve(name, permissions)?)))
            .collect::<Result<BTreeMap<_, _>, BrokerError>>()?;
        Ok(ResolvedSecrets { values })
    }
}
