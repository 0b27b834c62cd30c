//! Scalar list metrics over dense integer codes, plus the wrappers that
//! remap item ids to those codes.

use std::collections::{BTreeSet, HashMap, HashSet};

/// Pure metric functions over dense integer codes.
///
/// Implementations must be deterministic for identical inputs and must not
/// keep any reference to their inputs after returning.
pub trait MetricKernel {
    /// Gini index of how often each code of `targets` occurs in `observed`.
    ///
    /// `targets` is deduplicated. Codes of `observed` missing from `targets`
    /// are ignored.
    fn gini(&self, targets: &[u32], observed: &[u32]) -> f64;

    /// nDCG of the ranking `rec`, where `scores[code]` is the relevance of
    /// `code` and codes past the end of `scores` have no relevance.
    ///
    /// When `sorted` is set, `scores` is already in descending order and is
    /// taken as the ideal ranking as is.
    fn ndcg(&self, scores: &[f64], rec: &[u32], sorted: bool) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeKernel;

impl MetricKernel for NativeKernel {
    fn gini(&self, targets: &[u32], observed: &[u32]) -> f64 {
        let n_tgt = targets.len();
        if n_tgt == 0 {
            return 0.0;
        }
        let index: HashMap<u32, usize> = targets.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let mut counts = vec![0.0; n_tgt];
        for code in observed {
            if let Some(&i_tgt) = index.get(code) {
                counts[i_tgt] += 1.0;
            }
        }
        let total: f64 = counts.iter().sum();
        if total == 0.0 {
            return 0.0;
        }
        counts.sort_by(f64::total_cmp);

        let n = n_tgt as f64;
        let weighted: f64 = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| (2.0 * (i + 1) as f64 - n - 1.0) * count)
            .sum();
        weighted / (n * total)
    }

    fn ndcg(&self, scores: &[f64], rec: &[u32], sorted: bool) -> f64 {
        let discount = |rank: usize| (rank as f64 + 2.0).log2();

        let dcg: f64 = rec
            .iter()
            .enumerate()
            .map(|(rank, &code)| scores.get(code as usize).copied().unwrap_or(0.0) / discount(rank))
            .sum();

        let mut ideal = scores.to_vec();
        if !sorted {
            ideal.sort_by(|a, b| b.total_cmp(a));
        }
        let idcg: f64 = ideal
            .iter()
            .take(rec.len())
            .enumerate()
            .map(|(rank, &score)| score / discount(rank))
            .sum();

        if idcg == 0.0 { 0.0 } else { dcg / idcg }
    }
}

/// Gini index of item exposure in `observed`, over the distinct observed items.
pub fn gini_of_items<K: MetricKernel + ?Sized>(kernel: &K, observed: &[&str]) -> f64 {
    let distinct: BTreeSet<&str> = observed.iter().copied().collect();
    let code: HashMap<&str, u32> = distinct.iter().zip(0..).map(|(&item, c)| (item, c)).collect();
    let targets: Vec<u32> = (0..distinct.len() as u32).collect();
    let observed: Vec<u32> = observed.iter().map(|item| code[item]).collect();
    kernel.gini(&targets, &observed)
}

/// nDCG of `rec` against relevance `scores` of `items`.
///
/// Items get codes in the order of `items`, then in order of first
/// appearance in `rec` for items not in `items`.
pub fn ndcg_of_items<K: MetricKernel + ?Sized>(
    kernel: &K,
    items: &[&str],
    scores: &[f64],
    rec: &[&str],
    sorted: bool,
) -> f64 {
    let mut code: HashMap<&str, u32> = HashMap::new();
    for &item in items.iter().chain(rec) {
        let next = code.len() as u32;
        code.entry(item).or_insert(next);
    }
    let rec: Vec<u32> = rec.iter().map(|item| code[item]).collect();
    kernel.ndcg(scores, &rec, sorted)
}

/// Extrapolated rank-biased overlap of two rankings with persistence `p`.
///
/// Evaluated to the depth of the shorter ranking; `None` when either
/// ranking is empty. Identical rankings score 1 and disjoint ones 0.
pub fn rank_biased_overlap(a: &[&str], b: &[&str], p: f64) -> Option<f64> {
    let depth = a.len().min(b.len());
    if depth == 0 {
        return None;
    }
    let mut seen_a = HashSet::with_capacity(depth);
    let mut seen_b = HashSet::with_capacity(depth);
    let mut overlap = 0usize;
    let mut sum = 0.0;
    let mut weight = 1.0;
    for d in 1..=depth {
        let (x, y) = (a[d - 1], b[d - 1]);
        if x == y {
            overlap += 1;
        } else {
            overlap += usize::from(seen_b.contains(x)) + usize::from(seen_a.contains(y));
        }
        seen_a.insert(x);
        seen_b.insert(y);
        weight *= p;
        sum += overlap as f64 / d as f64 * weight;
    }
    let agreement = overlap as f64 / depth as f64;
    Some(agreement * weight + (1.0 - p) / p * sum)
}
