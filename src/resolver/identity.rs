//! ProfileIdentity: which browser profile a helper (or a window) belongs to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A browser profile process: its bundle identifier plus, once known, the
/// pid of the browser process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileIdentity {
    #[serde(rename = "bundleId")]
    pub bundle_id: String,
    #[serde(rename = "processId", default)]
    pub pid: Option<u32>,
}

impl ProfileIdentity {
    pub fn new(bundle_id: impl Into<String>, pid: u32) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            pid: Some(pid),
        }
    }

    /// Identity known only from the extension's self-registration.
    pub fn bundle_only(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            pid: None,
        }
    }

    /// Whether a message addressed to `target` is meant for `self`.
    ///
    /// Bundle ids must always agree. Pids are compared only when both
    /// sides know theirs; a bundle-only identity matches on bundle alone.
    pub fn matches(&self, target: &ProfileIdentity) -> bool {
        if self.bundle_id != target.bundle_id {
            return false;
        }
        match (self.pid, target.pid) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }
}

impl fmt::Display for ProfileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "{} (pid {pid})", self.bundle_id),
            None => write!(f, "{} (pid unknown)", self.bundle_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_identities_compare_bundle_and_pid() {
        let chrome_a = ProfileIdentity::new("com.google.Chrome", 100);
        let chrome_b = ProfileIdentity::new("com.google.Chrome", 200);
        assert!(chrome_a.matches(&chrome_a.clone()));
        assert!(!chrome_a.matches(&chrome_b));
    }

    #[test]
    fn different_bundles_never_match() {
        let chrome = ProfileIdentity::bundle_only("com.google.Chrome");
        let brave = ProfileIdentity::new("com.brave.Browser", 100);
        assert!(!chrome.matches(&brave));
    }

    #[test]
    fn bundle_only_falls_back_to_bundle_comparison() {
        let registered = ProfileIdentity::bundle_only("com.google.Chrome");
        assert!(registered.matches(&ProfileIdentity::new("com.google.Chrome", 100)));
        assert!(ProfileIdentity::new("com.google.Chrome", 100).matches(&registered));
    }
}
