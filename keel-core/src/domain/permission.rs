//! Permission domain types
//!
//! A job declares the access it needs on external resources (`contents`,
//! `packages`, ...). Secrets carry the scope they require, and the
//! credential broker only hands a secret to jobs whose permissions grant it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DefinitionError;

/// Access level on a resource
///
/// Ordered so that `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    None,
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::None => write!(f, "none"),
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

impl FromStr for Access {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Access::None),
            "read" => Ok(Access::Read),
            "write" => Ok(Access::Write),
            other => Err(DefinitionError::InvalidScope(format!(
                "unknown access level '{}'",
                other
            ))),
        }
    }
}

/// A required access on a single resource, written `resource:access`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope {
    pub resource: String,
    pub access: Access,
}

impl Scope {
    pub fn new(resource: impl Into<String>, access: Access) -> Self {
        Self {
            resource: resource.into(),
            access,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.access)
    }
}

impl FromStr for Scope {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, access) = s.split_once(':').ok_or_else(|| {
            DefinitionError::InvalidScope(format!("'{}' is not of the form resource:access", s))
        })?;

        if resource.is_empty() {
            return Err(DefinitionError::InvalidScope(format!(
                "'{}' has an empty resource",
                s
            )));
        }

        let access: Access = access.parse()?;
        if access == Access::None {
            return Err(DefinitionError::InvalidScope(format!(
                "'{}' requires no access",
                s
            )));
        }

        Ok(Scope::new(resource, access))
    }
}

impl TryFrom<String> for Scope {
    type Error = DefinitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Permissions declared by a job
///
/// Resources that are not listed have no access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, Access>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the access on a resource
    pub fn with(mut self, resource: impl Into<String>, access: Access) -> Self {
        self.0.insert(resource.into(), access);
        self
    }

    /// Access granted on a resource
    pub fn access(&self, resource: &str) -> Access {
        self.0.get(resource).copied().unwrap_or(Access::None)
    }

    /// Whether these permissions satisfy the scope
    pub fn grants(&self, scope: &Scope) -> bool {
        self.access(&scope.resource) >= scope.access
    }

    /// All scopes granted, one per resource with access
    pub fn scopes(&self) -> Vec<Scope> {
        self.0
            .iter()
            .filter(|(_, access)| **access != Access::None)
            .map(|(resource, access)| Scope::new(resource.clone(), *access))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|access| *access == Access::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parsing() {
        let scope: Scope = "packages:write".parse().unwrap();
        assert_eq!(scope.resource, "packages");
        assert_eq!(scope.access, Access::Write);
        assert_eq!(scope.to_string(), "packages:write");

        assert!("packages".parse::<Scope>().is_err());
        assert!(":read".parse::<Scope>().is_err());
        assert!("packages:admin".parse::<Scope>().is_err());
        assert!("packages:none".parse::<Scope>().is_err());
    }

    #[test]
    fn test_write_implies_read() {
        let permissions = Permissions::new()
            .with("packages", Access::Write)
            .with("contents", Access::Read);

        assert!(permissions.grants(&Scope::new("packages", Access::Read)));
        assert!(permissions.grants(&Scope::new("packages", Access::Write)));
        assert!(permissions.grants(&Scope::new("contents", Access::Read)));
        assert!(!permissions.grants(&Scope::new("contents", Access::Write)));
        assert!(!permissions.grants(&Scope::new("deployments", Access::Read)));
    }

    #[test]
    fn test_permissions_from_yaml() {
        let permissions: Permissions =
            serde_yaml::from_str("contents: read\npackages: write\nissues: none\n").unwrap();

        assert_eq!(permissions.access("issues"), Access::None);
        assert_eq!(permissions.scopes().len(), 2);
        assert!(!permissions.is_empty());
        assert!(Permissions::new().is_empty());
    }
}
