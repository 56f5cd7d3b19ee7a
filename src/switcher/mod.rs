//! The extension side of switching: MRU ranking, the session machine and
//! the replies it sends back to the helper.
//!
//! [`Switcher`] owns all tab state for one profile and talks to the
//! browser only through [`TabHost`]. Inputs are helper messages, browser
//! commands and tab events; outputs are [`ExtensionMessage`]s to post.

pub mod ranking;
pub mod session;
pub mod thumbnails;

use std::time::Instant;

use crate::native::protocol::{ExtensionMessage, HostMessage, TabCard, TabId};
use ranking::TabRanking;
use session::{Direction, SessionSlot, SwitchSession, TriggerClass};
use thumbnails::ThumbnailCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub i64);

/// What the browser knows about one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub window: WindowId,
    pub title: String,
    pub fav_icon_url: String,
    pub url: String,
}

/// The browser APIs the switcher needs.
pub trait TabHost {
    /// `None` once the tab has closed.
    fn tab(&self, id: TabId) -> Option<TabInfo>;
    /// Active tab of the focused window.
    fn current_tab(&self) -> Option<TabInfo>;
    fn current_window(&self) -> Option<WindowId>;
    /// Whether any normal window of this profile has focus.
    fn profile_focused(&self) -> bool;
    /// Focus the tab's window and make the tab active.
    fn activate(&mut self, id: TabId);
}

/// Legacy browser-level commands, bound in the extension manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltCommand {
    Fast,
    SlowBackward,
    SlowForward,
}

impl AltCommand {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "alt_switch_fast" => Some(Self::Fast),
            "alt_switch_slow_backward" => Some(Self::SlowBackward),
            "alt_switch_slow_forward" => Some(Self::SlowForward),
            _ => None,
        }
    }

    fn class(self) -> TriggerClass {
        match self {
            Self::Fast => TriggerClass::AltFast,
            Self::SlowBackward | Self::SlowForward => TriggerClass::AltSlow,
        }
    }

    /// "Backward" walks deeper into history, which is a forward step in
    /// the ranking; "forward" walks back toward the present.
    fn direction(self) -> Direction {
        match self {
            Self::Fast | Self::SlowBackward => Direction::Forward,
            Self::SlowForward => Direction::Backward,
        }
    }
}

pub struct Switcher<H: TabHost> {
    host: H,
    bundle_id: String,
    extension_version: Option<String>,
    ranking: TabRanking,
    slot: SessionSlot,
    thumbnails: ThumbnailCache,
}

impl<H: TabHost> Switcher<H> {
    pub fn new(host: H, bundle_id: impl Into<String>) -> Self {
        Self {
            host,
            bundle_id: bundle_id.into(),
            extension_version: None,
            ranking: TabRanking::new(),
            slot: SessionSlot::default(),
            thumbnails: ThumbnailCache::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.extension_version = Some(version.into());
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn ranking(&self) -> &TabRanking {
        &self.ranking
    }

    pub fn session(&self) -> Option<&SwitchSession> {
        self.slot.active()
    }

    pub fn populate(&mut self, tabs: impl IntoIterator<Item = TabId>) {
        self.ranking.populate(tabs);
    }

    // Tab events ----------------------------------------------------------

    pub fn on_tab_created(&mut self, id: TabId) {
        self.ranking.on_created(id);
    }

    pub fn on_tab_removed(&mut self, id: TabId) {
        self.ranking.on_removed(id);
        self.thumbnails.remove(id);
        if let Some(session) = self.slot.active_mut() {
            session.remove_tab(id);
        }
    }

    /// Activations caused by our own cycling are not user choices.
    pub fn on_tab_activated(&mut self, id: TabId) {
        if self.slot.is_active() {
            return;
        }
        self.ranking.on_activated(id);
    }

    /// Keep a capture of `id`. Captures of closed tabs and of pages the
    /// browser will not capture are dropped; returns whether it was kept.
    pub fn store_thumbnail(&mut self, id: TabId, data_url: String) -> bool {
        match self.host.tab(id) {
            Some(tab) if ThumbnailCache::capturable(&tab.url) => {
                self.thumbnails.insert(id, data_url);
                true
            }
            Some(tab) => {
                tracing::trace!(tab = %id, url = %tab.url, "page not capturable");
                false
            }
            None => false,
        }
    }

    /// Focus left every window of this profile.
    pub fn on_focus_lost(&mut self) -> Vec<ExtensionMessage> {
        if self.slot.active_of(TriggerClass::Native).is_none() {
            return Vec::new();
        }
        self.abandon_native("focus lost mid-switch")
    }

    // Helper messages -----------------------------------------------------

    pub fn handle(&mut self, message: HostMessage) -> Vec<ExtensionMessage> {
        tracing::trace!(action = message.action(), "from helper");
        match message {
            HostMessage::Ready => vec![ExtensionMessage::Register {
                bundle_id: self.bundle_id.clone(),
                extension_version: self.extension_version.clone(),
            }],
            HostMessage::Registered { bundle_id, shortcuts } => {
                tracing::debug!(%bundle_id, tab_switch = %shortcuts.tab_switch, "registered with helper");
                Vec::new()
            }
            HostMessage::CycleNext {
                show_ui,
                current_window_only,
            } => self.cycle(Direction::Forward, show_ui, current_window_only),
            HostMessage::CyclePrev {
                show_ui,
                current_window_only,
            } => self.cycle(Direction::Backward, show_ui, current_window_only),
            HostMessage::RequestShowUi { current_window_only } => {
                self.request_show_ui(current_window_only)
            }
            HostMessage::EndSwitch => self.end_native(),
            HostMessage::Ping => vec![ExtensionMessage::Pong],
            HostMessage::Pong => Vec::new(),
            HostMessage::CopyUrl => self.copy_url(),
            HostMessage::ErrorNoAccessibility => {
                tracing::warn!("helper cannot intercept the keyboard");
                Vec::new()
            }
        }
    }

    fn cycle(&mut self, direction: Direction, show_ui: bool, current_window_only: bool) -> Vec<ExtensionMessage> {
        if !self.host.profile_focused() {
            return self.on_focus_lost();
        }

        let mut out = Vec::new();
        if self.slot.active_of(TriggerClass::Native).is_none() {
            self.begin(TriggerClass::Native, current_window_only, &mut out);
        }

        let Some(session) = self.slot.active_of(TriggerClass::Native) else {
            return out;
        };
        if session.step(direction).is_none() {
            tracing::debug!("nothing to cycle over");
            return out;
        }

        if session.ui_revealed() {
            self.prune_stale();
            if let Some(session) = self.slot.active() {
                out.push(ExtensionMessage::UpdateSelection {
                    selected_index: session.cursor(),
                });
            }
        } else if show_ui {
            out.extend(self.reveal());
        }
        out
    }

    fn request_show_ui(&mut self, _current_window_only: bool) -> Vec<ExtensionMessage> {
        if !self.host.profile_focused() {
            return Vec::new();
        }
        let pending = self
            .slot
            .active_of(TriggerClass::Native)
            .is_some_and(|s| !s.ui_revealed());
        if !pending {
            return Vec::new();
        }
        self.reveal().into_iter().collect()
    }

    fn end_native(&mut self) -> Vec<ExtensionMessage> {
        if self.slot.active_of(TriggerClass::Native).is_none() {
            return Vec::new();
        }
        if !self.host.profile_focused() {
            return self.abandon_native("end requested while unfocused");
        }

        let mut out = Vec::new();
        if let Some(session) = self.slot.take() {
            if session.ui_revealed() {
                out.push(ExtensionMessage::HideSwitcher);
            }
            if let Some(id) = session.selected() {
                if self.host.tab(id).is_some() {
                    self.host.activate(id);
                }
                self.ranking.commit(id);
                tracing::debug!(tab = %id, "native switch committed");
            }
        }
        out
    }

    /// End the native session without activating anything.
    fn abandon_native(&mut self, why: &str) -> Vec<ExtensionMessage> {
        let Some(session) = self.slot.take() else {
            return Vec::new();
        };
        tracing::debug!(why, "native switch abandoned");
        if session.ui_revealed() {
            vec![ExtensionMessage::HideSwitcher]
        } else {
            Vec::new()
        }
    }

    fn copy_url(&mut self) -> Vec<ExtensionMessage> {
        match self.host.current_tab() {
            Some(tab) if !tab.url.is_empty() => vec![ExtensionMessage::UrlCopied { url: tab.url }],
            _ => {
                tracing::debug!("no active tab url to copy");
                Vec::new()
            }
        }
    }

    // Alt commands --------------------------------------------------------

    /// One legacy command. Each step activates its tab right away; the
    /// session commits after the class's idle timeout (see [`Self::expire`]).
    pub fn alt_command(&mut self, command: AltCommand, now: Instant) -> Vec<ExtensionMessage> {
        let class = command.class();
        let mut out = Vec::new();

        if self.slot.active_of(class).is_none() {
            self.begin(class, false, &mut out);
        }

        // Closed tabs are dropped as they are hit. Removal leaves the cursor
        // on the following tab, so only a backward walk needs another step.
        let direction = command.direction();
        let mut candidate = self.slot.active_of(class).and_then(|s| s.step(direction));
        while let Some(id) = candidate {
            if self.host.tab(id).is_some() {
                self.host.activate(id);
                break;
            }
            tracing::debug!(tab = %id, "skipping closed tab");
            self.ranking.on_removed(id);
            candidate = self.slot.active_mut().and_then(|s| {
                s.remove_tab(id);
                match direction {
                    Direction::Forward => s.selected(),
                    Direction::Backward => s.step(Direction::Backward),
                }
            });
        }

        if let Some(session) = self.slot.active_of(class) {
            session.touch(now);
        }
        out
    }

    /// Commit a timed session whose idle deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<ExtensionMessage> {
        let mut out = Vec::new();
        if self.slot.active().is_some_and(|s| s.expired(now)) {
            if let Some(session) = self.slot.take() {
                self.conclude(session, &mut out);
            }
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slot.active().and_then(|s| s.deadline())
    }

    // Internals -----------------------------------------------------------

    /// Start a session of `class`. A session of another class is
    /// concluded first, so the new working set sees its commit.
    fn begin(&mut self, class: TriggerClass, current_window_only: bool, out: &mut Vec<ExtensionMessage>) {
        if let Some(prior) = self.slot.take() {
            self.conclude(prior, out);
        }
        let working_set = self.working_set(current_window_only);
        tracing::debug!(?class, tabs = working_set.len(), current_window_only, "switch started");
        self.slot.begin(SwitchSession::start(class, working_set));
    }

    /// End a displaced or expired session as a commit.
    fn conclude(&mut self, session: SwitchSession, out: &mut Vec<ExtensionMessage>) {
        if session.ui_revealed() {
            out.push(ExtensionMessage::HideSwitcher);
        }
        if let Some(id) = session.selected() {
            if session.class() == TriggerClass::Native && self.host.tab(id).is_some() {
                self.host.activate(id);
            }
            self.ranking.commit(id);
        }
        tracing::debug!(class = ?session.class(), "switch concluded");
    }

    fn working_set(&self, current_window_only: bool) -> Vec<TabId> {
        let all = self.ranking.as_slice();
        if !current_window_only {
            return all.to_vec();
        }
        let Some(window) = self.host.current_window() else {
            return all.to_vec();
        };

        let filtered: Vec<TabId> = all
            .iter()
            .copied()
            .filter(|&id| self.host.tab(id).is_some_and(|t| t.window == window))
            .collect();
        if filtered.is_empty() { all.to_vec() } else { filtered }
    }

    /// Drop working-set tabs that no longer exist, from the ranking too.
    fn prune_stale(&mut self) {
        let Some(session) = self.slot.active() else {
            return;
        };
        let stale: Vec<TabId> = session
            .working_set()
            .iter()
            .copied()
            .filter(|&id| self.host.tab(id).is_none())
            .collect();

        for id in stale {
            tracing::debug!(tab = %id, "pruning stale tab");
            self.ranking.on_removed(id);
            if let Some(session) = self.slot.active_mut() {
                session.remove_tab(id);
            }
        }
    }

    fn reveal(&mut self) -> Option<ExtensionMessage> {
        self.prune_stale();
        let session = self.slot.active_mut()?;
        if session.working_set().is_empty() || !session.reveal() {
            return None;
        }
        let selected_index = session.cursor();
        let ids = session.working_set().to_vec();

        let tabs = ids
            .into_iter()
            .filter_map(|id| self.host.tab(id))
            .map(|tab| TabCard {
                id: tab.id,
                title: if tab.title.is_empty() {
                    "Untitled".to_string()
                } else {
                    tab.title
                },
                fav_icon_url: tab.fav_icon_url,
                thumbnail: self.thumbnails.get(tab.id).map(str::to_string),
                url: tab.url,
            })
            .collect();

        Some(ExtensionMessage::ShowSwitcher {
            tabs,
            selected_index,
        })
    }
}
