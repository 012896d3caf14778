//! Roles and the operation whitelist

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access roles, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Role {
    /// Anonymous view-only session
    #[default]
    Viewer = 0,
    /// Approved user, access level 1
    Member = 1,
    /// Approved user, access level 2
    Manager = 2,
    /// The configured administrator
    Admin = 3,
}

impl Role {
    /// Role of an approved user with the given access level
    pub fn from_access_level(level: u8) -> Self {
        if level >= 2 {
            Role::Manager
        } else {
            Role::Member
        }
    }

    /// Admin or access level 2
    pub fn is_elevated(&self) -> bool {
        *self >= Role::Manager
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Viewer => write!(f, "VIEWER"),
            Role::Member => write!(f, "MEMBER"),
            Role::Manager => write!(f, "MANAGER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Minimum role for an operation. Unknown operations return None and are blocked.
pub fn get_required_role(operation: &str) -> Option<Role> {
    match operation {
        "read_projects" | "read_deepwells" => Some(Role::Viewer),

        "write_projects"
        | "write_deepwells"
        | "read_reforestations"
        | "write_reforestations"
        | "export_reports"
        | "read_contacts"
        | "chat" => Some(Role::Member),

        "write_contract_docs" | "delete_projects" | "delete_deepwells" => Some(Role::Manager),

        "delete_reforestations"
        | "manage_users"
        | "clear_messages"
        | "manage_config" => Some(Role::Admin),

        _ => None,
    }
}

/// Check if an operation is allowed for the given role
pub fn is_operation_allowed(operation: &str, role: Role) -> bool {
    match get_required_role(operation) {
        Some(required) => role >= required,
        None => false,
    }
}
