//! Most-recently-used tab order.

use crate::native::protocol::TabId;

/// Tab ids, most recent first. Each open tab appears exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabRanking {
    order: Vec<TabId>,
}

impl TabRanking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an enumeration of open tabs, kept in enumeration order.
    pub fn populate(&mut self, tabs: impl IntoIterator<Item = TabId>) {
        for id in tabs {
            self.on_created(id);
        }
    }

    /// New tabs have never been used, so they rank last.
    pub fn on_created(&mut self, id: TabId) {
        if !self.contains(id) {
            self.order.push(id);
        }
    }

    pub fn on_removed(&mut self, id: TabId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.order.remove(index);
                true
            }
            None => false,
        }
    }

    /// Move `id` to the front, inserting it if it was unknown.
    pub fn on_activated(&mut self, id: TabId) {
        if let Some(index) = self.position(id) {
            self.order.remove(index);
        }
        self.order.insert(0, id);
    }

    /// End of a switch: the chosen tab becomes the most recent.
    pub fn commit(&mut self, id: TabId) {
        if let Some(index) = self.position(id) {
            self.order[..=index].rotate_right(1);
        }
    }

    pub fn position(&self, id: TabId) -> Option<usize> {
        self.order.iter().position(|&t| t == id)
    }

    pub fn contains(&self, id: TabId) -> bool {
        self.order.contains(&id)
    }

    pub fn as_slice(&self) -> &[TabId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[i64]) -> Vec<TabId> {
        raw.iter().copied().map(TabId).collect()
    }

    #[test]
    fn populate_keeps_enumeration_order() {
        let mut r = TabRanking::new();
        r.populate(ids(&[3, 1, 2, 1]));
        assert_eq!(r.as_slice(), ids(&[3, 1, 2]).as_slice());
    }

    #[test]
    fn activation_moves_to_front() {
        let mut r = TabRanking::new();
        r.populate(ids(&[1, 2, 3]));
        r.on_activated(TabId(3));
        assert_eq!(r.as_slice(), ids(&[3, 1, 2]).as_slice());

        // Unknown tab is inserted at the front rather than dropped.
        r.on_activated(TabId(9));
        assert_eq!(r.as_slice(), ids(&[9, 3, 1, 2]).as_slice());
    }

    #[test]
    fn created_goes_last_removed_disappears() {
        let mut r = TabRanking::new();
        r.populate(ids(&[1, 2]));
        r.on_created(TabId(5));
        r.on_created(TabId(1));
        assert_eq!(r.as_slice(), ids(&[1, 2, 5]).as_slice());

        assert!(r.on_removed(TabId(2)));
        assert!(!r.on_removed(TabId(2)));
        assert_eq!(r.as_slice(), ids(&[1, 5]).as_slice());
    }

    #[test]
    fn commit_of_unknown_tab_is_ignored() {
        let mut r = TabRanking::new();
        r.populate(ids(&[1, 2, 3]));
        r.commit(TabId(3));
        assert_eq!(r.as_slice(), ids(&[3, 1, 2]).as_slice());
        r.commit(TabId(7));
        assert_eq!(r.as_slice(), ids(&[3, 1, 2]).as_slice());
    }

    /// Replays a long pseudo-random event sequence against a model: the
    /// open set, and the tick at which each tab was last used.
    #[test]
    fn mirrors_open_tabs_in_recency_order() {
        let mut r = TabRanking::new();
        let mut last_used: std::collections::HashMap<TabId, (u64, u64)> = Default::default();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next_id = 0;

        for tick in 1..2_000u64 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            let open: Vec<TabId> = r.as_slice().to_vec();
            match seed % 4 {
                0 | 1 if !open.is_empty() => {
                    let id = open[(seed as usize / 4) % open.len()];
                    r.on_activated(id);
                    last_used.insert(id, (1, tick));
                }
                2 if !open.is_empty() => {
                    let id = open[(seed as usize / 4) % open.len()];
                    r.on_removed(id);
                    last_used.remove(&id);
                }
                _ => {
                    next_id += 1;
                    r.on_created(TabId(next_id));
                    // Never activated: ranks after every activated tab,
                    // newer creations after older ones.
                    last_used.insert(TabId(next_id), (0, u64::MAX - tick));
                }
            }

            let mut expected: Vec<TabId> = last_used.keys().copied().collect();
            expected.sort_by_key(|id| std::cmp::Reverse(last_used[id]));
            assert_eq!(r.as_slice(), expected.as_slice(), "diverged at tick {tick}");
        }
    }
}
