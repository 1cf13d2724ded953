//! Invalidation scopes and signals.

use std::fmt;

use super::{ChangeOperation, Fingerprint, Table};

/// Which cache entries an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every entry whose fingerprint starts with this prefix.
    Prefix(Fingerprint),
    /// Every entry that declared a dependency on this table, plus entries
    /// whose fingerprint root is the table name.
    Table(Table),
}

impl Scope {
    pub fn prefix(root: impl Into<String>) -> Self {
        Scope::Prefix(Fingerprint::new(root))
    }
}

impl From<Table> for Scope {
    fn from(table: Table) -> Self {
        Scope::Table(table)
    }
}

impl From<Fingerprint> for Scope {
    fn from(fp: Fingerprint) -> Self {
        Scope::Prefix(fp)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Prefix(fp) => write!(f, "prefix {fp}"),
            Scope::Table(table) => write!(f, "table {table}"),
        }
    }
}

/// What caused an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// A local write succeeded.
    Mutation,
    /// The realtime feed reported a change.
    Realtime(ChangeOperation),
    /// Requested explicitly by the caller.
    Manual,
}

impl InvalidationReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            InvalidationReason::Mutation => "mutation",
            InvalidationReason::Realtime(_) => "realtime",
            InvalidationReason::Manual => "manual",
        }
    }
}

/// Instruction to treat cached data for a scope as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationSignal {
    pub scope: Scope,
    pub reason: InvalidationReason,
}

impl InvalidationSignal {
    pub fn new(scope: impl Into<Scope>, reason: InvalidationReason) -> Self {
        Self {
            scope: scope.into(),
            reason,
        }
    }

    pub fn manual(scope: impl Into<Scope>) -> Self {
        Self::new(scope, InvalidationReason::Manual)
    }
}
