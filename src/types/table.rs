//! Backend tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Tables of the back-office schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Leads,
    Devis,
    Chantiers,
    Configuration,
    Profiles,
    UserRoles,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Leads,
        Table::Devis,
        Table::Chantiers,
        Table::Configuration,
        Table::Profiles,
        Table::UserRoles,
    ];

    /// Name used on the wire and in realtime topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Leads => "leads",
            Table::Devis => "devis",
            Table::Chantiers => "chantiers",
            Table::Configuration => "configuration",
            Table::Profiles => "profiles",
            Table::UserRoles => "user_roles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::Configuration(format!("unknown table: {s}")))
    }
}
