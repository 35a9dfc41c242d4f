//! Managed-content policy
//!
//! Only network-addressable content is mirrored. Internal and blank pages,
//! pinned replicas and private replicas stay out of the workspace.

use url::Url;

use crate::Replica;

/// Decides which replicas the engine manages
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedPolicy {
    /// Lowercase URI schemes that are mirrored
    pub schemes: Vec<String>,
}

impl Default for ManagedPolicy {
    fn default() -> Self {
        ManagedPolicy {
            schemes: vec!["http".to_string(), "https".to_string()],
        }
    }
}

impl ManagedPolicy {
    pub fn with_schemes<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ManagedPolicy {
            schemes: schemes
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Check that a URI is addressable and uses a managed scheme
    pub fn is_managed_uri(&self, uri: &str) -> bool {
        match Url::parse(uri) {
            Ok(url) => !url.cannot_be_a_base() && self.schemes.iter().any(|s| s == url.scheme()),
            Err(_) => false,
        }
    }

    /// Check that a replica may enter the workspace
    pub fn is_managed(&self, replica: &Replica) -> bool {
        !replica.pinned && !replica.private && self.is_managed_uri(&replica.uri)
    }
}
