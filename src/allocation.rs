//! Allocation mechanisms decide how much influence each agent gets per round.

use crate::properties::PropertySet;
use crate::registry::{Capabilities, Strategy, StrategyRegistry};
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::weighted::WeightedIndex;

/// Lower bound applied to fairness and compatibility before exponentiation.
const SCORE_FLOOR: f64 = 1e-6;

/// Per-agent state an allocation mechanism may read, indexed by agent.
#[derive(Debug, Clone, Copy)]
pub struct AllocationInput<'a> {
    pub weights: &'a [f64],
    pub fairness: &'a [f64],
    pub compatibility: &'a [f64],
}

impl AllocationInput<'_> {
    fn n_agents(&self) -> Result<usize> {
        let n_agt = self.weights.len();
        if self.fairness.len() != n_agt || self.compatibility.len() != n_agt {
            bail!(
                "allocation input lengths differ: {} weights, {} fairness, {} compatibility",
                n_agt,
                self.fairness.len(),
                self.compatibility.len()
            );
        }
        Ok(n_agt)
    }
}

pub trait AllocationMechanism: Strategy {
    /// New agent weights, summing to 1 (empty when there are no agents).
    fn allocate(&self, input: &AllocationInput, rng: &mut ChaCha12Rng) -> Result<Vec<f64>>;
}

/// Scale `vals` to sum to 1, or spread uniformly when they sum to nothing.
pub fn normalize(vals: &[f64]) -> Vec<f64> {
    let sum: f64 = vals.iter().filter(|val| val.is_finite() && **val > 0.0).sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / vals.len() as f64; vals.len()];
    }
    vals.iter()
        .map(|&val| if val.is_finite() && val > 0.0 { val / sum } else { 0.0 })
        .collect()
}

fn one_hot(n_agt: usize, winner: usize) -> Vec<f64> {
    let mut weights = vec![0.0; n_agt];
    weights[winner] = 1.0;
    weights
}

/// Keeps the configured weights, renormalized.
#[derive(Debug)]
pub struct Fixed;

impl Fixed {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn AllocationMechanism>> {
        props.declare(&[], &[])?;
        Ok(Box::new(Self))
    }
}

impl Strategy for Fixed {}

impl AllocationMechanism for Fixed {
    fn allocate(&self, input: &AllocationInput, _rng: &mut ChaCha12Rng) -> Result<Vec<f64>> {
        input.n_agents()?;
        Ok(normalize(input.weights))
    }
}

/// Exponents of the compatibility × fairness product shared by the product
/// mechanisms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductExponents {
    pub compatibility: f64,
    pub fairness: f64,
}

impl ProductExponents {
    fn from_props(props: &PropertySet) -> Result<Self> {
        props.declare(&[], &["compatibility_exponent", "fairness_exponent"])?;
        Ok(Self {
            compatibility: props.f64_or("compatibility_exponent", 1.0)?,
            fairness: props.f64_or("fairness_exponent", 1.0)?,
        })
    }

    /// Shares proportional to `compatibility^a * fairness^b`.
    ///
    /// Computed in log space and shifted by the largest log product, so
    /// products beyond the range of `f64` still rank correctly.
    fn shares(&self, input: &AllocationInput) -> Result<Vec<f64>> {
        input.n_agents()?;
        let logs: Vec<f64> = input
            .compatibility
            .iter()
            .zip(input.fairness)
            .map(|(&compat, &fair)| {
                self.compatibility * compat.max(SCORE_FLOOR).ln()
                    + self.fairness * fair.max(SCORE_FLOOR).ln()
            })
            .collect();
        let max_log = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max_log.is_finite() {
            return Ok(normalize(&vec![1.0; logs.len()]));
        }
        let shifted: Vec<f64> = logs.iter().map(|log| (log - max_log).exp()).collect();
        Ok(normalize(&shifted))
    }
}

/// Weight proportional to `compatibility^a * fairness^b`.
///
/// A negative fairness exponent shifts weight toward the less fair agents.
#[derive(Debug)]
pub struct WeightedProduct {
    exponents: ProductExponents,
}

impl WeightedProduct {
    pub fn new(exponents: ProductExponents) -> Self {
        Self { exponents }
    }

    pub fn from_props(props: &PropertySet) -> Result<Box<dyn AllocationMechanism>> {
        Ok(Box::new(Self::new(ProductExponents::from_props(props)?)))
    }
}

impl Strategy for WeightedProduct {}

impl AllocationMechanism for WeightedProduct {
    fn allocate(&self, input: &AllocationInput, _rng: &mut ChaCha12Rng) -> Result<Vec<f64>> {
        self.exponents.shares(input)
    }
}

/// Gives all weight to one agent drawn with probability proportional to
/// the same product as [`WeightedProduct`].
#[derive(Debug)]
pub struct ProductLottery {
    exponents: ProductExponents,
}

impl ProductLottery {
    pub fn new(exponents: ProductExponents) -> Self {
        Self { exponents }
    }

    pub fn from_props(props: &PropertySet) -> Result<Box<dyn AllocationMechanism>> {
        Ok(Box::new(Self::new(ProductExponents::from_props(props)?)))
    }
}

impl Strategy for ProductLottery {
    fn capabilities(&self) -> Capabilities {
        Capabilities::RANDOM
    }
}

impl AllocationMechanism for ProductLottery {
    fn allocate(&self, input: &AllocationInput, rng: &mut ChaCha12Rng) -> Result<Vec<f64>> {
        let probs = self.exponents.shares(input)?;
        if probs.is_empty() {
            return Ok(probs);
        }
        let winner = WeightedIndex::new(&probs)?.sample(rng);
        Ok(one_hot(probs.len(), winner))
    }
}

/// Gives all weight to the least fair agent, the earliest one on ties.
#[derive(Debug)]
pub struct LeastFair;

impl LeastFair {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn AllocationMechanism>> {
        props.declare(&[], &[])?;
        Ok(Box::new(Self))
    }
}

impl Strategy for LeastFair {}

impl AllocationMechanism for LeastFair {
    fn allocate(&self, input: &AllocationInput, _rng: &mut ChaCha12Rng) -> Result<Vec<f64>> {
        let n_agt = input.n_agents()?;
        let winner = input
            .fairness
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (idx, &fair)| match best {
                Some((_, min)) if min <= fair => best,
                _ => Some((idx, fair)),
            });
        Ok(match winner {
            Some((idx, _)) => one_hot(n_agt, idx),
            None => Vec::new(),
        })
    }
}

pub fn registry() -> Result<StrategyRegistry<dyn AllocationMechanism>> {
    let mut reg = StrategyRegistry::new("allocation mechanism", Capabilities::NONE);
    reg.register("fixed", Fixed::from_props)?;
    reg.register("weighted_product_allocation", WeightedProduct::from_props)?;
    reg.register("product_lottery", ProductLottery::from_props)?;
    reg.register("least_fair", LeastFair::from_props)?;
    Ok(reg)
}
