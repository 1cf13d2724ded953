//! Query keys.

use crate::cache::RetentionClass;
use crate::types::{Fingerprint, Table};

/// Everything the executor needs to know about a query besides how to
/// fetch it: its fingerprint, the tables it reads (for table-scoped
/// invalidation) and its retention class.
///
/// ```rust
/// # use tuile::{Fingerprint, QueryKey, RetentionClass, Table};
/// let key = QueryKey::new(Fingerprint::new("configuration"))
///     .reads(Table::Configuration)
///     .class(RetentionClass::Static);
/// assert_eq!(key.tables, vec![Table::Configuration]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKey {
    pub fingerprint: Fingerprint,
    pub tables: Vec<Table>,
    pub class: RetentionClass,
}

impl QueryKey {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            tables: Vec::new(),
            class: RetentionClass::default(),
        }
    }

    /// Declare a table the query reads.
    pub fn reads(mut self, table: Table) -> Self {
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
        self
    }

    pub fn class(mut self, class: RetentionClass) -> Self {
        self.class = class;
        self
    }
}

impl From<Fingerprint> for QueryKey {
    fn from(fingerprint: Fingerprint) -> Self {
        Self::new(fingerprint)
    }
}
