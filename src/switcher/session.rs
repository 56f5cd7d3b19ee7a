//! Switch sessions: a frozen working set and a cursor over it.

use std::time::{Duration, Instant};

use crate::native::protocol::TabId;

/// Where a session's repeats come from. Sessions of different classes
/// never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerClass {
    /// Ctrl+Tab through the native helper; ends on modifier release.
    Native,
    /// `alt_switch_fast` browser command; ends after a short idle gap.
    AltFast,
    /// `alt_switch_slow_*` browser commands; ends after a long idle gap.
    AltSlow,
}

impl TriggerClass {
    /// Idle time after which an Alt session commits on its own.
    pub fn idle_timeout(self) -> Option<Duration> {
        match self {
            Self::Native => None,
            Self::AltFast => Some(Duration::from_millis(200)),
            Self::AltSlow => Some(Duration::from_millis(1500)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone)]
pub struct SwitchSession {
    class: TriggerClass,
    working_set: Vec<TabId>,
    cursor: usize,
    direction: Direction,
    ui_revealed: bool,
    deadline: Option<Instant>,
}

impl SwitchSession {
    /// Cursor starts on the first tab, the one currently in front.
    pub fn start(class: TriggerClass, working_set: Vec<TabId>) -> Self {
        Self {
            class,
            working_set,
            cursor: 0,
            direction: Direction::Forward,
            ui_revealed: false,
            deadline: None,
        }
    }

    pub fn class(&self) -> TriggerClass {
        self.class
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn working_set(&self) -> &[TabId] {
        &self.working_set
    }

    pub fn selected(&self) -> Option<TabId> {
        self.working_set.get(self.cursor).copied()
    }

    /// Move one step, wrapping. `None` when the working set is empty.
    pub fn step(&mut self, direction: Direction) -> Option<TabId> {
        let len = self.working_set.len();
        if len == 0 {
            return None;
        }
        self.direction = direction;
        self.cursor = match direction {
            Direction::Forward => (self.cursor + 1) % len,
            Direction::Backward => (self.cursor + len - 1) % len,
        };
        self.selected()
    }

    /// Drop a tab that vanished, keeping the cursor on the same tab when
    /// possible and in range otherwise.
    pub fn remove_tab(&mut self, id: TabId) -> bool {
        let Some(index) = self.working_set.iter().position(|&t| t == id) else {
            return false;
        };
        self.working_set.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.working_set.len() {
            self.cursor = 0;
        }
        true
    }

    pub fn ui_revealed(&self) -> bool {
        self.ui_revealed
    }

    /// Mark the overlay shown. Returns false if it already was.
    pub fn reveal(&mut self) -> bool {
        !std::mem::replace(&mut self.ui_revealed, true)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Push the idle deadline out from `now`, for timed classes.
    pub fn touch(&mut self, now: Instant) {
        self.deadline = self.class.idle_timeout().map(|t| now + t);
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Holder for the one session an extension may have.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Option<SwitchSession>,
}

impl SessionSlot {
    pub fn active(&self) -> Option<&SwitchSession> {
        self.current.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut SwitchSession> {
        self.current.as_mut()
    }

    /// The active session, only if it is of `class`.
    pub fn active_of(&mut self, class: TriggerClass) -> Option<&mut SwitchSession> {
        self.current.as_mut().filter(|s| s.class == class)
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Install a new session. Whatever was active before is returned so
    /// the caller can end it properly first.
    pub fn begin(&mut self, session: SwitchSession) -> Option<SwitchSession> {
        self.current.replace(session)
    }

    pub fn take(&mut self) -> Option<SwitchSession> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(n: i64) -> Vec<TabId> {
        (1..=n).map(TabId).collect()
    }

    #[test]
    fn two_forward_steps_from_front() {
        let mut s = SwitchSession::start(TriggerClass::Native, set(3));
        assert_eq!(s.selected(), Some(TabId(1)));
        s.step(Direction::Forward);
        assert_eq!(s.step(Direction::Forward), Some(TabId(3)));
    }

    #[test]
    fn first_backward_step_wraps_to_last() {
        let mut s = SwitchSession::start(TriggerClass::Native, set(4));
        assert_eq!(s.step(Direction::Backward), Some(TabId(4)));
        assert_eq!(s.direction(), Direction::Backward);
    }

    #[test]
    fn n_forward_then_n_backward_returns_to_start() {
        for len in 1..6 {
            for n in 0..12 {
                let mut s = SwitchSession::start(TriggerClass::Native, set(len));
                let start = s.cursor();
                for _ in 0..n {
                    s.step(Direction::Forward);
                }
                for _ in 0..n {
                    s.step(Direction::Backward);
                }
                assert_eq!(s.cursor(), start, "len {len}, n {n}");
            }
        }
    }

    #[test]
    fn empty_working_set_never_selects() {
        let mut s = SwitchSession::start(TriggerClass::Native, Vec::new());
        assert_eq!(s.step(Direction::Forward), None);
        assert_eq!(s.selected(), None);
    }

    #[test]
    fn removing_tabs_keeps_cursor_sane() {
        let mut s = SwitchSession::start(TriggerClass::Native, set(4));
        s.step(Direction::Forward);
        s.step(Direction::Forward);
        assert_eq!(s.selected(), Some(TabId(3)));

        // Before the cursor: cursor follows its tab.
        assert!(s.remove_tab(TabId(1)));
        assert_eq!(s.selected(), Some(TabId(3)));

        // The selected tab itself, at the end: wraps to the front.
        assert!(s.remove_tab(TabId(4)));
        assert!(s.remove_tab(TabId(3)));
        assert_eq!(s.selected(), Some(TabId(2)));
        assert!(!s.remove_tab(TabId(3)));
    }

    #[test]
    fn reveal_happens_once() {
        let mut s = SwitchSession::start(TriggerClass::Native, set(2));
        assert!(s.reveal());
        assert!(!s.reveal());
        assert!(s.ui_revealed());
    }

    #[test]
    fn timed_classes_expire() {
        let now = Instant::now();
        let mut fast = SwitchSession::start(TriggerClass::AltFast, set(2));
        fast.touch(now);
        assert!(!fast.expired(now + Duration::from_millis(199)));
        assert!(fast.expired(now + Duration::from_millis(200)));

        let mut native = SwitchSession::start(TriggerClass::Native, set(2));
        native.touch(now);
        assert!(!native.expired(now + Duration::from_secs(3600)));
    }

    #[test]
    fn slot_hands_back_the_displaced_session() {
        let mut slot = SessionSlot::default();
        assert!(slot.begin(SwitchSession::start(TriggerClass::AltSlow, set(2))).is_none());
        assert!(slot.active_of(TriggerClass::Native).is_none());

        let prior = slot.begin(SwitchSession::start(TriggerClass::Native, set(2)));
        assert_eq!(prior.map(|s| s.class()), Some(TriggerClass::AltSlow));
        assert!(slot.active_of(TriggerClass::Native).is_some());
        assert!(slot.take().is_some());
        assert!(!slot.is_active());
    }
}
