//! Reorder buffer restoring ascending page order after pipelined invocation.
//!
//! Slots form a window starting at the next page to emit. A completed page
//! parks in its slot until every predecessor has been popped. The window
//! width equals the invocation look-ahead, so at most `window` completed
//! pages are ever held.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: usize,
    window: usize,
    slots: VecDeque<Option<T>>,
}

impl<T> ReorderBuffer<T> {
    /// `first` is the page number that must be emitted first.
    pub fn new(first: usize, window: usize) -> Self {
        let window = window.max(1);
        Self {
            next: first,
            window,
            slots: VecDeque::with_capacity(window),
        }
    }

    /// Page number the next `pop_ready` will return.
    pub fn next_expected(&self) -> usize {
        self.next
    }

    /// Whether `page` falls inside the current window.
    pub fn accepts(&self, page: usize) -> bool {
        page >= self.next && page < self.next + self.window
    }

    /// Park a completed page. Returns `false` (and drops `item`) when the
    /// page is outside the window or its slot is already filled.
    pub fn insert(&mut self, page: usize, item: T) -> bool {
        if !self.accepts(page) {
            return false;
        }
        let offset = page - self.next;
        while self.slots.len() <= offset {
            self.slots.push_back(None);
        }
        match self.slots.get_mut(offset) {
            Some(slot) if slot.is_none() => {
                *slot = Some(item);
                true
            }
            _ => false,
        }
    }

    /// Pop the next page if it has completed.
    pub fn pop_ready(&mut self) -> Option<(usize, T)> {
        match self.slots.front() {
            Some(Some(_)) => {
                let item = self.slots.pop_front().flatten()?;
                let page = self.next;
                self.next += 1;
                Some((page, item))
            }
            _ => None,
        }
    }

    /// Number of completed pages waiting on a predecessor.
    pub fn parked(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_inserts_pop_immediately() {
        let mut buf = ReorderBuffer::new(1, 3);
        assert!(buf.insert(1, "a"));
        assert_eq!(buf.pop_ready(), Some((1, "a")));
        assert!(buf.insert(2, "b"));
        assert_eq!(buf.pop_ready(), Some((2, "b")));
        assert_eq!(buf.pop_ready(), None);
        assert_eq!(buf.next_expected(), 3);
    }

    #[test]
    fn out_of_order_waits_for_predecessor() {
        let mut buf = ReorderBuffer::new(1, 4);
        assert!(buf.insert(3, "c"));
        assert!(buf.insert(2, "b"));
        assert_eq!(buf.pop_ready(), None);
        assert_eq!(buf.parked(), 2);

        assert!(buf.insert(1, "a"));
        let drained: Vec<_> = std::iter::from_fn(|| buf.pop_ready()).collect();
        assert_eq!(drained, vec![(1, "a"), (2, "b"), (3, "c")]);
        assert_eq!(buf.parked(), 0);
    }

    #[test]
    fn rejects_outside_window_and_duplicates() {
        let mut buf = ReorderBuffer::new(1, 2);
        assert!(!buf.accepts(3));
        assert!(!buf.insert(3, 30));
        assert!(buf.insert(2, 20));
        assert!(!buf.insert(2, 21));
        assert!(!buf.insert(0, 0));

        assert!(buf.insert(1, 10));
        assert_eq!(buf.pop_ready(), Some((1, 10)));
        // Window slid forward by one.
        assert!(buf.accepts(3));
    }
}
