//! User roles and the UI affordances they unlock.
//!
//! Roles are enforced server-side (row-level security). The [`Permissions`]
//! derived here only decide which buttons a view shows.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of the signed-in user, as returned by `get_user_role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "secretaire")]
    Staff,
    #[default]
    #[serde(rename = "lecteur")]
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "secretaire",
            Role::Viewer => "lecteur",
        }
    }

    pub fn permissions(&self) -> Permissions {
        Permissions {
            role: *self,
            can_edit: matches!(self, Role::Admin | Role::Staff),
            can_delete: matches!(self, Role::Admin),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation affordances for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub role: Role,
    /// Create and edit rows (admin, secretaire).
    pub can_edit: bool,
    /// Delete rows and change company configuration (admin).
    pub can_delete: bool,
}

impl Permissions {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
