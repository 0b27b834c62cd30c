//! Choice mechanisms fuse weighted per-agent lists into one final ranking.

use crate::error::ensure_finite;
use crate::properties::PropertySet;
use crate::registry::{Capabilities, Strategy, StrategyRegistry};
use crate::results::ResultList;
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use std::collections::{HashMap, HashSet};

/// One weighted input list.
pub type Ballot<'a> = (f64, &'a ResultList);

pub trait ChoiceMechanism: Strategy {
    /// Combine `ballots` into one list over the union of their items.
    fn combine(&self, ballots: &[Ballot], rng: &mut ChaCha12Rng) -> Result<ResultList>;
}

/// Union of ballot items in first-appearance order.
fn item_union<'a>(ballots: &[Ballot<'a>]) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for (_, list) in ballots {
        for item in list.items() {
            if seen.insert(item) {
                items.push(item);
            }
        }
    }
    items
}

fn ballot_user<'a>(ballots: &[Ballot<'a>]) -> &'a str {
    ballots.first().map(|(_, list)| list.user()).unwrap_or_default()
}

fn finish(user: &str, items: &[&str], scores: &HashMap<&str, f64>) -> Result<ResultList> {
    let mut pairs = Vec::with_capacity(items.len());
    for &item in items {
        let score = scores.get(item).copied().unwrap_or(0.0);
        pairs.push((item, ensure_finite(score, "choice mechanism")?));
    }
    ResultList::from_scores(user, pairs)
}

/// Sum of `weight * score` per item. Items missing from a ballot contribute
/// nothing from it; ties keep first-appearance order.
#[derive(Debug)]
pub struct WeightedScoring;

impl WeightedScoring {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn ChoiceMechanism>> {
        props.declare(&[], &[])?;
        Ok(Box::new(Self))
    }
}

impl Strategy for WeightedScoring {}

impl ChoiceMechanism for WeightedScoring {
    fn combine(&self, ballots: &[Ballot], _rng: &mut ChaCha12Rng) -> Result<ResultList> {
        let items = item_union(ballots);
        let mut scores: HashMap<&str, f64> = HashMap::with_capacity(items.len());
        for (weight, list) in ballots {
            for entry in list.entries() {
                *scores.entry(entry.item.as_str()).or_insert(0.0) += weight * entry.score;
            }
        }
        finish(ballot_user(ballots), &items, &scores)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingRule {
    /// A ballot of `n` items gives `n - 1 - p` points to the item at position `p`.
    Borda,
    /// A ballot gives one point to its top item.
    Plurality,
    /// Pairwise weighted majority; score is wins minus losses. Items missing
    /// from a ballot rank below every item it contains.
    Copeland,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreaker {
    /// Tied items are ordered by a shuffle drawn from the run generator.
    Random,
    /// Tied items are ordered by ascending item id.
    Lexicographic,
}

/// Social-choice combination of ballots.
///
/// Ballot points are multiplied by the ballot weight unless `ignore_weights`
/// is set. Ties in the final score are resolved by the [`TieBreaker`].
#[derive(Debug)]
pub struct Voting {
    rule: VotingRule,
    tie_breaker: TieBreaker,
    ignore_weights: bool,
}

impl Voting {
    pub fn new(rule: VotingRule, tie_breaker: TieBreaker, ignore_weights: bool) -> Self {
        Self {
            rule,
            tie_breaker,
            ignore_weights,
        }
    }

    pub fn from_props(props: &PropertySet) -> Result<Box<dyn ChoiceMechanism>> {
        props.declare(&["rule"], &["tie_breaker", "ignore_weights"])?;
        let rule = match props.str("rule")?.to_ascii_lowercase().as_str() {
            "borda" => VotingRule::Borda,
            "plurality" => VotingRule::Plurality,
            "copeland" => VotingRule::Copeland,
            other => bail!("unknown voting rule {other:?}"),
        };
        let tie_breaker = match props.str_or("tie_breaker", "random")?.to_ascii_lowercase().as_str() {
            "random" => TieBreaker::Random,
            "lexicographic" => TieBreaker::Lexicographic,
            other => bail!("unknown tie breaker {other:?}"),
        };
        let ignore_weights = props.bool_or("ignore_weights", false)?;
        Ok(Box::new(Self::new(rule, tie_breaker, ignore_weights)))
    }

    fn points<'a>(&self, ballots: &[Ballot<'a>], items: &[&'a str]) -> HashMap<&'a str, f64> {
        let weight = |w: f64| if self.ignore_weights { 1.0 } else { w };
        let mut points: HashMap<&str, f64> = items.iter().map(|&item| (item, 0.0)).collect();
        match self.rule {
            VotingRule::Borda => {
                for (w, list) in ballots {
                    let n = list.len();
                    for (pos, item) in list.items().enumerate() {
                        *points.entry(item).or_insert(0.0) += weight(*w) * (n - 1 - pos) as f64;
                    }
                }
            }
            VotingRule::Plurality => {
                for (w, list) in ballots {
                    if let Some(top) = list.items().next() {
                        *points.entry(top).or_insert(0.0) += weight(*w);
                    }
                }
            }
            VotingRule::Copeland => {
                let positions: Vec<HashMap<&str, usize>> = ballots
                    .iter()
                    .map(|(_, list)| list.items().enumerate().map(|(pos, item)| (item, pos)).collect())
                    .collect();
                for (idx_a, &a) in items.iter().enumerate() {
                    for &b in &items[idx_a + 1..] {
                        let mut margin = 0.0;
                        for ((w, _), pos) in ballots.iter().zip(&positions) {
                            let rank_a = pos.get(a).copied().unwrap_or(usize::MAX);
                            let rank_b = pos.get(b).copied().unwrap_or(usize::MAX);
                            if rank_a < rank_b {
                                margin += weight(*w);
                            } else if rank_b < rank_a {
                                margin -= weight(*w);
                            }
                        }
                        let outcome = if margin > 0.0 {
                            1.0
                        } else if margin < 0.0 {
                            -1.0
                        } else {
                            0.0
                        };
                        *points.entry(a).or_insert(0.0) += outcome;
                        *points.entry(b).or_insert(0.0) -= outcome;
                    }
                }
            }
        }
        points
    }
}

impl Strategy for Voting {
    fn capabilities(&self) -> Capabilities {
        match self.tie_breaker {
            TieBreaker::Random => Capabilities::RANDOM,
            TieBreaker::Lexicographic => Capabilities::NONE,
        }
    }
}

impl ChoiceMechanism for Voting {
    fn combine(&self, ballots: &[Ballot], rng: &mut ChaCha12Rng) -> Result<ResultList> {
        let mut items = item_union(ballots);
        let points = self.points(ballots, &items);
        // The final sort is stable, so the order fed to it decides ties.
        match self.tie_breaker {
            TieBreaker::Random => items.shuffle(rng),
            TieBreaker::Lexicographic => items.sort_unstable(),
        }
        finish(ballot_user(ballots), &items, &points)
    }
}

pub fn registry() -> Result<StrategyRegistry<dyn ChoiceMechanism>> {
    let mut reg = StrategyRegistry::new("choice mechanism", Capabilities::NONE);
    reg.register("weighted_scoring", WeightedScoring::from_props)?;
    reg.register("voting", Voting::from_props)?;
    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(scores: &[(&str, f64)]) -> ResultList {
        ResultList::from_scores("u1", scores.iter().copied()).unwrap()
    }

    fn items(list: &ResultList) -> Vec<&str> {
        list.items().collect()
    }

    #[test]
    fn weighted_scoring_sums_over_the_item_union() {
        let base = list(&[("a", 1.0), ("b", 0.5)]);
        let agent = list(&[("b", 2.0), ("c", 1.0)]);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let out = WeightedScoring
            .combine(&[(1.0, &base), (0.5, &agent)], &mut rng)
            .unwrap();

        assert_eq!(items(&out), ["b", "a", "c"]);
        assert_eq!(out.score_of("b"), Some(1.5));
        assert_eq!(out.score_of("a"), Some(1.0));
        assert_eq!(out.score_of("c"), Some(0.5));
        assert_eq!(out.user(), "u1");
    }

    #[test]
    fn borda_with_lexicographic_ties() {
        let one = list(&[("b", 2.0), ("a", 1.0)]);
        let two = list(&[("a", 2.0), ("b", 1.0)]);
        let voting = Voting::new(VotingRule::Borda, TieBreaker::Lexicographic, false);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let out = voting.combine(&[(1.0, &one), (1.0, &two)], &mut rng).unwrap();
        assert_eq!(items(&out), ["a", "b"]);

        let out = voting.combine(&[(1.0, &one), (2.0, &two)], &mut rng).unwrap();
        assert_eq!(items(&out), ["a", "b"]);
        assert_eq!(out.score_of("a"), Some(2.0));

        let out = voting.combine(&[(3.0, &one), (1.0, &two)], &mut rng).unwrap();
        assert_eq!(items(&out), ["b", "a"]);
    }

    #[test]
    fn ignore_weights_counts_every_ballot_once() {
        let one = list(&[("b", 2.0), ("a", 1.0)]);
        let two = list(&[("a", 2.0), ("c", 1.0)]);
        let voting = Voting::new(VotingRule::Plurality, TieBreaker::Lexicographic, true);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let out = voting.combine(&[(5.0, &one), (1.0, &two)], &mut rng).unwrap();
        assert_eq!(items(&out), ["a", "b", "c"]);
        assert_eq!(out.score_of("b"), Some(1.0));
    }

    #[test]
    fn copeland_counts_pairwise_wins() {
        let one = list(&[("a", 3.0), ("b", 2.0), ("c", 1.0)]);
        let two = list(&[("b", 3.0), ("a", 2.0)]);
        let three = list(&[("a", 3.0), ("c", 2.0)]);
        let voting = Voting::new(VotingRule::Copeland, TieBreaker::Lexicographic, false);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let out = voting
            .combine(&[(1.0, &one), (1.0, &two), (1.0, &three)], &mut rng)
            .unwrap();
        assert_eq!(items(&out), ["a", "b", "c"]);
        assert_eq!(out.score_of("a"), Some(2.0));
        assert_eq!(out.score_of("c"), Some(-2.0));
    }

    #[test]
    fn random_ties_are_reproducible_for_a_seed() {
        let one = list(&[("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 1.0)]);
        let voting = Voting::new(VotingRule::Plurality, TieBreaker::Random, false);
        let combine = |seed| {
            let mut rng = ChaCha12Rng::seed_from_u64(seed);
            voting.combine(&[(1.0, &one)], &mut rng).unwrap()
        };
        assert_eq!(combine(7), combine(7));
        assert_eq!(combine(7).entries()[0].item, "a");
    }
}
