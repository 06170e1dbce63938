//! Duplicate suppression for inbound messages.

use std::collections::{BTreeSet, HashMap};

use crate::core::SessionId;

/// Sliding record of seen counters for one peer session.
///
/// The window spans the `capacity` counters ending at the highest one seen.
/// Counters are forgotten in counter order as the window slides, so anything
/// older than the window is reported as already seen rather than accepted
/// again. This is the same span `CryptoSession::open` accepts when its replay
/// bound equals `capacity`.
#[derive(Debug, Clone)]
pub struct DuplicateWindow {
    capacity: usize,
    highest: Option<u32>,
    seen: BTreeSet<u32>,
}

impl DuplicateWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            highest: None,
            seen: BTreeSet::new(),
        }
    }

    pub fn contains(&self, counter: u32) -> bool {
        self.seen.contains(&counter)
    }

    /// Whether `counter` is older than anything the window can still vouch for.
    pub fn is_behind(&self, counter: u32) -> bool {
        self.highest
            .is_some_and(|highest| counter < highest && (highest - counter) as usize >= self.capacity)
    }

    /// Record `counter`. Returns `true` if it was already seen or is too old
    /// to tell.
    pub fn check_and_insert(&mut self, counter: u32) -> bool {
        if self.is_behind(counter) || self.seen.contains(&counter) {
            return true;
        }
        self.seen.insert(counter);
        if self.highest.is_none_or(|highest| counter > highest) {
            self.highest = Some(counter);
            let span = u32::try_from(self.capacity - 1).unwrap_or(u32::MAX);
            let floor = counter.saturating_sub(span);
            self.seen = self.seen.split_off(&floor);
        }
        false
    }

    pub fn highest(&self) -> Option<u32> {
        self.highest
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Duplicate windows for every live session.
#[derive(Debug, Clone)]
pub struct DuplicateFilter {
    window_size: usize,
    windows: HashMap<SessionId, DuplicateWindow>,
}

impl DuplicateFilter {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            windows: HashMap::new(),
        }
    }

    /// Record an authenticated counter. Returns `true` for a duplicate.
    pub fn is_duplicate(&mut self, session_id: SessionId, counter: u32) -> bool {
        let window_size = self.window_size;
        self.windows
            .entry(session_id)
            .or_insert_with(|| DuplicateWindow::new(window_size))
            .check_and_insert(counter)
    }

    /// Drop all state for a session.
    pub fn remove_session(&mut self, session_id: SessionId) {
        self.windows.remove(&session_id);
    }

    pub fn window(&self, session_id: SessionId) -> Option<&DuplicateWindow> {
        self.windows.get(&session_id)
    }

    pub fn session_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_detects_duplicates() {
        let mut window = DuplicateWindow::new(4);
        assert!(!window.check_and_insert(10));
        assert!(window.check_and_insert(10));
        assert!(!window.check_and_insert(11));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_window_slides_with_highest_counter() {
        let mut window = DuplicateWindow::new(3);
        for c in [1, 2, 3, 4] {
            assert!(!window.check_and_insert(c));
        }
        assert!(!window.contains(1));
        assert!(window.contains(4));
        assert_eq!(window.len(), 3);
        // Forgotten counters are never accepted again.
        assert!(window.is_behind(1));
        assert!(window.check_and_insert(1));
    }

    #[test]
    fn test_reordered_counters_stay_remembered() {
        let mut window = DuplicateWindow::new(4);
        // 10 arrives first, then the older ones catch up.
        for c in [10, 7, 8, 9] {
            assert!(!window.check_and_insert(c));
        }
        assert!(!window.check_and_insert(11));
        assert_eq!(window.highest(), Some(11));
        // 10 was the first arrival but is still inside the window.
        assert!(window.check_and_insert(10));
        assert!(!window.contains(7));
        assert!(window.check_and_insert(7));
    }

    #[test]
    fn test_late_counter_inside_window_accepted() {
        let mut window = DuplicateWindow::new(8);
        assert!(!window.check_and_insert(20));
        assert!(!window.check_and_insert(13));
        assert!(window.is_behind(12));
        assert!(!window.is_behind(13));
    }

    #[test]
    fn test_filter_is_per_session() {
        let mut filter = DuplicateFilter::new(8);
        let a = SessionId::new(1);
        let b = SessionId::new(2);
        assert!(!filter.is_duplicate(a, 5));
        assert!(!filter.is_duplicate(b, 5));
        assert!(filter.is_duplicate(a, 5));
        assert_eq!(filter.session_count(), 2);

        filter.remove_session(a);
        assert!(filter.window(a).is_none());
        assert!(!filter.is_duplicate(a, 5));
    }
}
