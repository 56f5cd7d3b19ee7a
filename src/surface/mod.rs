//! Where the helper's user-visible output goes: the switcher overlay,
//! toasts and the clipboard.

pub mod clipboard;

use crate::native::protocol::TabCard;

/// Renders the floating tab-card overlay on behalf of the extension.
pub trait SwitcherOverlay: Send + Sync {
    fn show(&mut self, tabs: &[TabCard], selected_index: usize);
    fn update_selection(&mut self, selected_index: usize);
    fn hide(&mut self);
    /// Short transient notice, e.g. after a URL copy.
    fn toast(&mut self, text: &str);
}

/// Overlay that only logs what it would draw.
#[derive(Debug, Default)]
pub struct LogOverlay {
    cards: Vec<TabCard>,
    selected: Option<usize>,
}

impl LogOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> bool {
        self.selected.is_some()
    }

    pub fn selected_card(&self) -> Option<&TabCard> {
        self.selected.and_then(|i| self.cards.get(i))
    }
}

impl SwitcherOverlay for LogOverlay {
    fn show(&mut self, tabs: &[TabCard], selected_index: usize) {
        self.cards = tabs.to_vec();
        self.selected = Some(selected_index);
        for (index, card) in self.cards.iter().enumerate() {
            tracing::debug!(
                index,
                tab = %card.id,
                title = %card.title,
                thumbnail = card.thumbnail.is_some(),
                selected = index == selected_index,
                "overlay card"
            );
        }
        tracing::info!(cards = self.cards.len(), selected_index, "overlay shown");
    }

    fn update_selection(&mut self, selected_index: usize) {
        if self.selected.is_none() {
            tracing::debug!(selected_index, "selection update for hidden overlay");
            return;
        }
        if selected_index >= self.cards.len() {
            tracing::warn!(selected_index, cards = self.cards.len(), "selection out of range");
            return;
        }
        self.selected = Some(selected_index);
        let title = self.selected_card().map(|c| c.title.as_str()).unwrap_or_default();
        tracing::info!(selected_index, %title, "overlay selection");
    }

    fn hide(&mut self) {
        if self.selected.take().is_some() {
            tracing::info!("overlay hidden");
        }
        self.cards.clear();
    }

    fn toast(&mut self, text: &str) {
        tracing::info!(%text, "toast");
    }
}
