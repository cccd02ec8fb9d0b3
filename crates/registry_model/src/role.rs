//! Session roles

use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of the person operating this session.
///
/// The role's string form is recorded as the actor on every remote write
/// (`updatedBy`, `checkedBy`, `editedBy`, `importedBy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access: import, export and delete in addition to edits
    Admin,
    /// Can view lists, edit phone numbers and update member status
    Viewer,
}

impl Role {
    /// Actor string written to remote documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Viewer => "viewer",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Fail with [`ModelError::PermissionDenied`] unless this is the admin role
    pub fn require_admin(&self, action: &str) -> ModelResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ModelError::PermissionDenied {
                action: action.to_string(),
            })
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Viewer
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "viewer" => Ok(Role::Viewer),
            other => Err(ModelError::UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" viewer ".parse::<Role>().unwrap(), Role::Viewer);
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_require_admin() {
        assert!(Role::Admin.require_admin("import").is_ok());
        assert_eq!(
            Role::Viewer.require_admin("import"),
            Err(ModelError::PermissionDenied {
                action: "import".to_string()
            })
        );
    }
}
