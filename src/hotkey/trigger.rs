//! Leader-side switch driver: hook events in, bus messages out.
//!
//! The first press of a session pins the target profile and advances
//! without UI; a reveal timer asks for the overlay if the modifier is
//! still held after the reveal delay. Any further press reveals
//! immediately. Release commits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::focus::FocusProbe;
use super::{KeyEvent, KeyEventSink};
use crate::bus::BroadcastBus;
use crate::bus::message::{BusMessage, CycleDirection};
use crate::resolver::catalog::BrowserCatalog;
use crate::resolver::identity::ProfileIdentity;

struct TriggerSession {
    target: ProfileIdentity,
    combine: bool,
    presses: u32,
    reveal: Option<JoinHandle<()>>,
}

impl TriggerSession {
    fn cancel_reveal(&mut self) {
        if let Some(timer) = self.reveal.take() {
            timer.abort();
        }
    }
}

pub struct SwitchTrigger {
    bus: Arc<dyn BroadcastBus>,
    focus: Box<dyn FocusProbe>,
    catalog: Arc<BrowserCatalog>,
    reveal_delay: Duration,
    session: Option<TriggerSession>,
}

impl SwitchTrigger {
    pub fn new(
        bus: Arc<dyn BroadcastBus>,
        focus: Box<dyn FocusProbe>,
        catalog: Arc<BrowserCatalog>,
        reveal_delay: Duration,
    ) -> Self {
        Self {
            bus,
            focus,
            catalog,
            reveal_delay,
            session: None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.session.is_some()
    }

    pub fn set_catalog(&mut self, catalog: Arc<BrowserCatalog>) {
        self.catalog = catalog;
    }

    fn press(&mut self, direction: CycleDirection) {
        if self.session.is_none() {
            let Some(target) = self.focus.frontmost_browser(&self.catalog) else {
                tracing::debug!("switch shortcut outside an enabled browser");
                return;
            };
            let combine = self.catalog.combine_all_windows(&target.bundle_id);
            tracing::debug!(target = %target, combine, "switch session started");
            self.session = Some(TriggerSession {
                target,
                combine,
                presses: 0,
                reveal: None,
            });
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.presses += 1;
        let show_ui = session.presses > 1;
        if show_ui {
            session.cancel_reveal();
        }

        self.bus.publish(BusMessage::CtrlTab {
            direction,
            show_ui,
            combine_windows: session.combine,
            target_browser: session.target.clone(),
        });

        if session.presses == 1 {
            let bus = self.bus.clone();
            let delay = self.reveal_delay;
            let reveal = BusMessage::RequestShowUi {
                combine_windows: session.combine,
                target_browser: session.target.clone(),
            };
            session.reveal = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                bus.publish(reveal);
            }));
        }
    }

    /// End the session and ask the target to commit. No-op when idle.
    pub fn finish(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.cancel_reveal();
        tracing::debug!(target = %session.target, presses = session.presses, "switch session ended");
        self.bus.publish(BusMessage::CtrlRelease {
            target_browser: session.target,
        });
    }

    fn copy_url(&mut self) {
        if self.session.is_some() {
            return;
        }
        match self.focus.frontmost_browser(&self.catalog) {
            Some(target) => self.bus.publish(BusMessage::CopyUrl {
                target_browser: target,
            }),
            None => tracing::debug!("copy shortcut outside an enabled browser"),
        }
    }

    /// Force the session to end if focus moved away from its target.
    /// Returns whether it did.
    pub fn check_focus(&mut self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let front = self.focus.frontmost_browser(&self.catalog);
        if front.as_ref() == Some(&session.target) {
            return false;
        }
        tracing::info!(target = %session.target, now = ?front, "focus left the switching browser");
        self.finish();
        true
    }
}

impl KeyEventSink for SwitchTrigger {
    fn on_key_event(&mut self, event: KeyEvent) {
        match event {
            KeyEvent::SwitchPressed { reverse } => self.press(CycleDirection::from_reverse(reverse)),
            KeyEvent::SwitchModifierReleased => self.finish(),
            KeyEvent::CopyUrlPressed => self.copy_url(),
        }
    }
}

impl Drop for SwitchTrigger {
    fn drop(&mut self) {
        if let Some(session) = &mut self.session {
            session.cancel_reveal();
        }
    }
}
