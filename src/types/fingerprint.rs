//! Query fingerprints.
//!
//! A [`Fingerprint`] identifies one logical query: stable key parts
//! (`"chantiers"`) followed by serialized parameter values (`"\"toit\""`).
//! Two views asking for the same data compute the same fingerprint and
//! therefore share one cache entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Ordered key identifying one logical query.
///
/// ```rust
/// # use tuile::Fingerprint;
/// let fp = Fingerprint::new("chantiers").param(&Some("toit")).unwrap();
/// assert!(fp.starts_with(&Fingerprint::new("chantiers")));
/// assert_eq!(fp.root(), "chantiers");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Vec<String>);

impl Fingerprint {
    /// Start a fingerprint with its root key part.
    pub fn new(root: impl Into<String>) -> Self {
        Self(vec![root.into()])
    }

    /// Append a stable key part.
    pub fn with(mut self, part: impl Into<String>) -> Self {
        self.0.push(part.into());
        self
    }

    /// Append a parameter value, serialized as JSON.
    ///
    /// JSON keeps `"null"`, `"3"` and `"\"3\""` distinct, so `None`, the
    /// number 3 and the string "3" never collide.
    pub fn param<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.0.push(serde_json::to_string(value)?);
        Ok(self)
    }

    /// The first key part, used as the metric label.
    pub fn root(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Prefix match on whole key parts.
    pub fn starts_with(&self, prefix: &Fingerprint) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}
