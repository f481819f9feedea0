//! Deployment identity: the primary key for deployed artifacts.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Immutable `(kind, name, version)` triple plus an optional scope.
///
/// Two artifacts with equal identity may not coexist as two separate roots
/// in the runtime model. Kinds like `bundle`, `plan`, and `configuration`
/// are conventions of the artifact-type adapters, not of the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactIdentity {
    pub kind: String,
    pub name: String,
    pub version: Version,
    pub scope: Option<String>,
}

impl ArtifactIdentity {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            version,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind, self.name, self.version)?;
        if let Some(scope) = &self.scope {
            write!(f, "@{scope}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_scope_when_present() {
        let unscoped = ArtifactIdentity::new("bundle", "demo", Version::new(1, 2, 3));
        assert_eq!(unscoped.to_string(), "bundle:demo/1.2.3");

        let scoped = unscoped.clone().with_scope("plan-a");
        assert_eq!(scoped.to_string(), "bundle:demo/1.2.3@plan-a");
    }

    #[test]
    fn scope_distinguishes_identities() {
        let a = ArtifactIdentity::new("bundle", "demo", Version::new(1, 0, 0));
        let b = a.clone().with_scope("plan-a");
        assert_ne!(a, b);
    }
}
