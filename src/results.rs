//! Scored recommendation lists.

use crate::error::{ConfigError, ensure_finite};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One scored item of a [`ResultList`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationEntry {
    pub item: String,
    pub score: f64,
    /// 1-based display rank, assigned whenever the list is sorted.
    pub rank: Option<usize>,
}

/// Ordered recommendations for one user in one round.
///
/// Entries are kept sorted by descending score. Sorting is stable, so entries
/// with equal scores keep their relative input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultList {
    user: String,
    entries: Vec<RecommendationEntry>,
}

impl ResultList {
    /// Create an empty list for `user`.
    pub fn empty(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            entries: Vec::new(),
        }
    }

    /// Build a list from `(user, item, score)` triples.
    ///
    /// All triples must share one user. Duplicate items and non-finite scores
    /// are rejected with [`ConfigError::MalformedResultList`]. An empty input
    /// yields an empty list attributed to an empty user id.
    pub fn from_triples<U, I>(triples: impl IntoIterator<Item = (U, I, f64)>) -> Result<Self>
    where
        U: Into<String>,
        I: Into<String>,
    {
        let mut user: Option<String> = None;
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (triple_user, item, score) in triples {
            let triple_user = triple_user.into();
            let item = item.into();
            let user = user.get_or_insert_with(|| triple_user.clone());
            if *user != triple_user {
                return Err(malformed(user, format!("mixed user {triple_user:?}")));
            }
            if !score.is_finite() {
                return Err(malformed(user, format!("non-finite score for item {item:?}")));
            }
            if !seen.insert(item.clone()) {
                return Err(malformed(user, format!("duplicate item {item:?}")));
            }
            entries.push(RecommendationEntry {
                item,
                score,
                rank: None,
            });
        }

        let mut list = Self {
            user: user.unwrap_or_default(),
            entries,
        };
        list.resort();
        Ok(list)
    }

    /// Build a list for `user` from `(item, score)` pairs.
    pub fn from_scores<I: Into<String>>(
        user: &str,
        scores: impl IntoIterator<Item = (I, f64)>,
    ) -> Result<Self> {
        let list = Self::from_triples(scores.into_iter().map(|(item, score)| (user, item, score)))?;
        Ok(Self {
            user: user.to_string(),
            ..list
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn entries(&self) -> &[RecommendationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.item.as_str())
    }

    /// Score of `item`, if present.
    pub fn score_of(&self, item: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.item == item)
            .map(|entry| entry.score)
    }

    /// Whether both lists hold exactly the same items.
    pub fn same_items(&self, other: &ResultList) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let items: HashSet<&str> = self.items().collect();
        other.items().all(|item| items.contains(item))
    }

    /// Replace every score with `scoring_fn(entry)`, then re-sort.
    ///
    /// `scoring_fn` sees entries in the current order, which some scorers
    /// rely on. A non-finite new score is an invariant violation.
    pub fn rescore<F>(&mut self, mut scoring_fn: F) -> Result<()>
    where
        F: FnMut(&RecommendationEntry) -> f64,
    {
        let new_scores: Vec<f64> = self.entries.iter().map(&mut scoring_fn).collect();
        for (entry, score) in self.entries.iter_mut().zip(new_scores) {
            entry.score = ensure_finite(score, &format!("rescore of item {:?}", entry.item))?;
        }
        self.resort();
        Ok(())
    }

    /// Keep only the first `len` entries. `0` keeps everything.
    pub fn truncate(&mut self, len: usize) {
        if len > 0 {
            self.entries.truncate(len);
        }
    }

    fn resort(&mut self) {
        self.entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            entry.rank = Some(idx + 1);
        }
    }
}

fn malformed(user: &str, reason: String) -> anyhow::Error {
    ConfigError::MalformedResultList {
        user: user.to_string(),
        reason,
    }
    .into()
}
