//! Managed-object URI type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A hierarchical managed-object identifier.
///
/// URIs are opaque strings with value equality and a total order, used as
/// keys throughout the policy model and the policy manager's indices. The
/// hierarchy is path-like: `/policy/space/common/group/web`.
///
/// # Examples
///
/// ```
/// use netpol_types::Uri;
///
/// let a = Uri::new("/policy/group/web");
/// let b = Uri::new("/policy/group/web");
/// assert_eq!(a, b);
/// assert!(a < Uri::new("/policy/group/web/sub"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Creates a URI from a path string.
    pub fn new(path: impl Into<String>) -> Self {
        Uri(path.into())
    }

    /// The root of the managed-object tree.
    pub fn root() -> Self {
        Uri("/".to_string())
    }

    /// Returns the URI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a child URI formed by appending one path segment.
    pub fn child(&self, segment: &str) -> Self {
        if self.0.ends_with('/') {
            Uri(format!("{}{}", self.0, segment))
        } else {
            Uri(format!("{}/{}", self.0, segment))
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri(s.to_string())
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Uri(s)
    }
}
