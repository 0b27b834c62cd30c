use crate::results::ResultList;
use std::collections::VecDeque;

/// How many of the most recent lists to return from [`History::recent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    All,
    Last(usize),
}

/// Bounded FIFO of the final result lists of past rounds.
///
/// Once `capacity` lists are held, each append evicts the oldest one.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    lists: VecDeque<ResultList>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lists: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn append(&mut self, list: ResultList) {
        if self.capacity == 0 {
            return;
        }
        if self.lists.len() == self.capacity {
            self.lists.pop_front();
        }
        self.lists.push_back(list);
    }

    /// The most recent lists in chronological order, oldest first.
    pub fn recent(&self, window: Window) -> impl Iterator<Item = &ResultList> {
        let skip = match window {
            Window::All => 0,
            Window::Last(n) => self.lists.len().saturating_sub(n),
        };
        self.lists.iter().skip(skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(user: &str) -> ResultList {
        ResultList::from_triples([(user, "i1", 1.0)]).unwrap()
    }

    fn users(history: &History, window: Window) -> Vec<String> {
        history
            .recent(window)
            .map(|list| list.user().to_string())
            .collect()
    }

    #[test]
    fn recent_all_is_append_order() {
        let mut history = History::new(5);
        assert!(history.is_empty());
        for user in ["u1", "u2", "u3"] {
            history.append(list(user));
        }
        assert_eq!(users(&history, Window::All), ["u1", "u2", "u3"]);
        assert_eq!(users(&history, Window::Last(2)), ["u2", "u3"]);
        assert_eq!(users(&history, Window::Last(10)), ["u1", "u2", "u3"]);
    }

    #[test]
    fn append_beyond_capacity_evicts_exactly_the_oldest() {
        let mut history = History::new(2);
        for user in ["u1", "u2", "u3"] {
            history.append(list(user));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(users(&history, Window::All), ["u2", "u3"]);
    }
}
