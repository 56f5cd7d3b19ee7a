//! Focus detection: which browser profile owns the focused window.
//!
//! The focused window's `_NET_WM_PID` is the browser process itself for
//! Chromium-family browsers; walking a few levels up covers wrappers
//! such as flatpak or snap launchers.

use crate::resolver::catalog::BrowserCatalog;
use crate::resolver::identity::ProfileIdentity;
use crate::resolver::owner::find_browser_ancestor;
use crate::resolver::process::{ProcFs, ProcessTree};

use super::HotkeyError;
use super::x11::X11Context;

/// Source of "which browser profile is in front".
pub trait FocusProbe: Send + Sync {
    /// The enabled browser owning the focused window, if any.
    fn frontmost_browser(&self, catalog: &BrowserCatalog) -> Option<ProfileIdentity>;
}

/// Identity of the enabled browser at or above `window_pid`.
pub fn browser_for_window<P: ProcessTree + ?Sized>(
    tree: &P,
    window_pid: u32,
    catalog: &BrowserCatalog,
) -> Option<ProfileIdentity> {
    let found = find_browser_ancestor(tree, window_pid, catalog)?;
    if catalog.get(&found.bundle_id).is_some_and(|b| b.enabled) {
        Some(found)
    } else {
        tracing::trace!(bundle_id = %found.bundle_id, "focused browser is disabled");
        None
    }
}

/// [`FocusProbe`] over its own X11 connection.
pub struct X11FocusProbe {
    ctx: X11Context,
}

impl X11FocusProbe {
    pub fn connect() -> Result<Self, HotkeyError> {
        Ok(Self {
            ctx: X11Context::connect()?,
        })
    }
}

impl FocusProbe for X11FocusProbe {
    fn frontmost_browser(&self, catalog: &BrowserCatalog) -> Option<ProfileIdentity> {
        let pid = match self.ctx.get_active_window_pid() {
            Ok(Some(pid)) => pid,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "active window query failed");
                return None;
            }
        };
        browser_for_window(&ProcFs, pid, catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrowserEntry;
    use crate::resolver::process::FakeTree;

    #[test]
    fn window_pid_is_the_browser() {
        let tree = FakeTree::default().with(30, 1, "chrome");
        assert_eq!(
            browser_for_window(&tree, 30, &BrowserCatalog::builtin()),
            Some(ProfileIdentity::new("com.google.Chrome", 30))
        );
    }

    #[test]
    fn wrapper_above_window_pid_is_walked() {
        // A launcher reports its own pid on the window; the browser is a parent.
        let tree = FakeTree::default()
            .with(31, 30, "bwrap")
            .with(30, 1, "brave-browser");
        assert_eq!(
            browser_for_window(&tree, 31, &BrowserCatalog::builtin()),
            Some(ProfileIdentity::new("com.brave.Browser", 30))
        );
    }

    #[test]
    fn non_browser_window_is_none() {
        let tree = FakeTree::default().with(40, 1, "alacritty");
        assert_eq!(browser_for_window(&tree, 40, &BrowserCatalog::builtin()), None);
    }

    #[test]
    fn disabled_browser_is_not_intercepted() {
        let catalog = BrowserCatalog::with_overrides(&[BrowserEntry {
            id: "com.google.Chrome".into(),
            enabled: Some(false),
            ..BrowserEntry::default()
        }])
        .unwrap();
        let tree = FakeTree::default().with(30, 1, "chrome");
        assert_eq!(browser_for_window(&tree, 30, &catalog), None);
    }
}
