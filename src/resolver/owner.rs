//! Which browser profile launched this helper.
//!
//! Browsers start native messaging hosts as (possibly indirect) children,
//! so walking up from our parent until an executable matches the catalog
//! finds the owning browser process. When nothing matches, the extension's
//! `register` message supplies the bundle id and the pid is recovered
//! later by re-walking.

use super::catalog::BrowserCatalog;
use super::identity::ProfileIdentity;
use super::process::{ProcFs, ProcessTree};

/// Ancestry levels inspected before giving up.
pub const MAX_WALK_DEPTH: usize = 10;

/// Walk upward from `start` (inclusive) looking for a catalogued browser.
pub fn find_browser_ancestor<P: ProcessTree + ?Sized>(
    tree: &P,
    start: u32,
    catalog: &BrowserCatalog,
) -> Option<ProfileIdentity> {
    let mut pid = start;

    for level in 0..MAX_WALK_DEPTH {
        if pid <= 1 {
            break;
        }

        if let Some(exe) = tree.executable_of(pid) {
            if let Some(browser) = catalog.identify(&exe) {
                tracing::debug!(level, pid, exe = %exe, bundle_id = %browser.id, "browser found in ancestry");
                return Some(ProfileIdentity::new(browser.id.clone(), pid));
            }
            tracing::trace!(level, pid, exe = %exe, "ancestor is not a browser");
        }

        match tree.parent_of(pid) {
            Some(parent) if parent != pid => pid = parent,
            _ => break,
        }
    }

    None
}

/// Owner identity of one helper process.
pub struct OwnerResolver<P: ProcessTree = ProcFs> {
    tree: P,
    self_pid: u32,
    identity: Option<ProfileIdentity>,
}

impl OwnerResolver<ProcFs> {
    pub fn for_current_process() -> Self {
        Self::new(ProcFs, std::process::id())
    }
}

impl<P: ProcessTree> OwnerResolver<P> {
    pub fn new(tree: P, self_pid: u32) -> Self {
        Self {
            tree,
            self_pid,
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<&ProfileIdentity> {
        self.identity.as_ref()
    }

    /// True while the pid half of the identity is still unknown.
    pub fn needs_pid(&self) -> bool {
        self.identity.as_ref().is_none_or(|id| id.pid.is_none())
    }

    /// Resolve (or re-attempt resolving) the owning browser.
    ///
    /// A full identity, once found, is never replaced. A bundle-only
    /// identity from registration only adopts a pid whose browser has the
    /// same bundle id.
    pub fn resolve_owner(&mut self, catalog: &BrowserCatalog) -> Option<&ProfileIdentity> {
        if !self.needs_pid() {
            return self.identity.as_ref();
        }

        let parent = self.tree.parent_of(self.self_pid)?;
        let Some(found) = find_browser_ancestor(&self.tree, parent, catalog) else {
            tracing::debug!(self_pid = self.self_pid, "no browser in ancestry");
            return self.identity.as_ref();
        };

        match &mut self.identity {
            None => {
                tracing::info!(owner = %found, "resolved owning browser from process tree");
                self.identity = Some(found);
            }
            Some(registered) if registered.bundle_id == found.bundle_id => {
                tracing::info!(owner = %found, "recovered owner pid");
                registered.pid = found.pid;
            }
            Some(registered) => {
                tracing::warn!(
                    registered = %registered,
                    walked = %found,
                    "process tree disagrees with registration; keeping registered bundle"
                );
            }
        }

        self.identity.as_ref()
    }

    /// Late binding from the extension's `register` message.
    ///
    /// Only fills an empty identity; an already resolved owner wins.
    pub fn register(&mut self, bundle_id: &str, catalog: &BrowserCatalog) -> &ProfileIdentity {
        match &self.identity {
            Some(current) if current.bundle_id != bundle_id => {
                tracing::warn!(
                    current = %current,
                    registered = bundle_id,
                    "extension registered a different browser; keeping resolved owner"
                );
            }
            Some(_) => {}
            None => {
                tracing::info!(bundle_id, "owner set from extension registration");
                self.identity = Some(ProfileIdentity::bundle_only(bundle_id));
                self.resolve_owner(catalog);
            }
        }

        self.identity
            .get_or_insert_with(|| ProfileIdentity::bundle_only(bundle_id))
    }

    /// The single gate for addressed events: does `target` mean us?
    pub fn accepts(&self, target: &ProfileIdentity) -> bool {
        self.identity.as_ref().is_some_and(|me| me.matches(target))
    }
}
