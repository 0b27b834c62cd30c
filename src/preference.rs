//! Preference functions: per-agent rescoring of a round's result list.
//!
//! Every preference function is non-destructive: it clones the incoming
//! list, rescores the clone and returns it, leaving the entry set unchanged.

use crate::context::RoundContext;
use crate::properties::PropertySet;
use crate::registry::{Capabilities, Strategy, StrategyRegistry};
use crate::results::ResultList;
use anyhow::Result;
use rand::prelude::*;
use rand_distr::Uniform;

pub trait PreferenceFunction: Strategy {
    fn compute(&self, list: &ResultList, ctx: &mut RoundContext) -> Result<ResultList>;
}

/// Adds `delta` to the score of every protected item.
#[derive(Debug)]
pub struct Binary {
    feature: String,
    delta: f64,
}

impl Binary {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        props.declare(&["feature", "delta"], &[])?;
        Ok(Box::new(Self {
            feature: props.str("feature")?.to_string(),
            delta: props.f64("delta")?,
        }))
    }
}

impl Strategy for Binary {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ATTRIBUTES
    }
}

impl PreferenceFunction for Binary {
    fn compute(&self, list: &ResultList, ctx: &mut RoundContext) -> Result<ResultList> {
        let mut out = list.clone();
        out.rescore(|entry| {
            if ctx.attrs.has_protected_attribute(&entry.item, &self.feature) {
                entry.score + self.delta
            } else {
                entry.score
            }
        })?;
        Ok(out)
    }
}

/// [`Binary`] plus uniform noise in `[-perturb, perturb]` on every score.
#[derive(Debug)]
pub struct PerturbedBinary {
    feature: String,
    delta: f64,
    perturb: f64,
}

impl PerturbedBinary {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        props.declare(&["feature", "delta"], &["perturb"])?;
        Ok(Box::new(Self {
            feature: props.str("feature")?.to_string(),
            delta: props.f64("delta")?,
            perturb: props.f64_or("perturb", 0.01)?.abs(),
        }))
    }
}

impl Strategy for PerturbedBinary {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ATTRIBUTES.union(Capabilities::RANDOM)
    }
}

impl PreferenceFunction for PerturbedBinary {
    fn compute(&self, list: &ResultList, ctx: &mut RoundContext) -> Result<ResultList> {
        let noise_dist = Uniform::new_inclusive(-self.perturb, self.perturb)?;
        let attrs = ctx.attrs;
        let rng = &mut *ctx.rng;
        let mut out = list.clone();
        out.rescore(|entry| {
            let boost = if attrs.has_protected_attribute(&entry.item, &self.feature) {
                self.delta
            } else {
                0.0
            };
            entry.score + boost + noise_dist.sample(&mut *rng)
        })?;
        Ok(out)
    }
}

/// Position-decayed scoring in the order the list arrives.
///
/// The entry at rank `r` (from 0) scores `delta / 2^(r+1)`; the `k`-th
/// protected item found (from 0) additionally gains `delta / 2^k`.
#[derive(Debug)]
pub struct Cascade {
    feature: String,
    delta: f64,
}

impl Cascade {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        props.declare(&["feature", "delta"], &[])?;
        Ok(Box::new(Self {
            feature: props.str("feature")?.to_string(),
            delta: props.f64("delta")?,
        }))
    }
}

impl Strategy for Cascade {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ATTRIBUTES
    }
}

impl PreferenceFunction for Cascade {
    fn compute(&self, list: &ResultList, ctx: &mut RoundContext) -> Result<ResultList> {
        let mut rank = 0;
        let mut n_protected = 0;
        let mut out = list.clone();
        out.rescore(|entry| {
            let mut score = self.delta / 2f64.powi(rank + 1);
            if ctx.attrs.has_protected_attribute(&entry.item, &self.feature) {
                score += self.delta / 2f64.powi(n_protected);
                n_protected += 1;
            }
            rank += 1;
            score
        })?;
        Ok(out)
    }
}

/// How an individual preference turns normalized popularity into a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndividualMode {
    /// `delta * normalized`, replacing the base score.
    Preference,
    /// `score + delta * normalized`.
    Norm,
    /// `score + (delta * normalized)^3`.
    Exponential,
    /// `score + delta` when `normalized >= 0.75`.
    Binary,
}

/// Favors items that have been exposed least, according to the round's
/// popularity snapshot.
#[derive(Debug)]
pub struct Individual {
    mode: IndividualMode,
    delta: f64,
}

impl Individual {
    pub fn new(mode: IndividualMode, delta: f64) -> Self {
        Self { mode, delta }
    }

    fn from_props_with(
        mode: IndividualMode,
        props: &PropertySet,
    ) -> Result<Box<dyn PreferenceFunction>> {
        props.declare(&["delta"], &[])?;
        Ok(Box::new(Self::new(mode, props.f64("delta")?)))
    }

    pub fn preference(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        Self::from_props_with(IndividualMode::Preference, props)
    }

    pub fn norm(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        Self::from_props_with(IndividualMode::Norm, props)
    }

    pub fn exponential(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        Self::from_props_with(IndividualMode::Exponential, props)
    }

    pub fn binary(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        Self::from_props_with(IndividualMode::Binary, props)
    }
}

impl Strategy for Individual {
    fn capabilities(&self) -> Capabilities {
        Capabilities::HISTORY.union(Capabilities::POPULARITY)
    }
}

impl PreferenceFunction for Individual {
    fn compute(&self, list: &ResultList, ctx: &mut RoundContext) -> Result<ResultList> {
        let counts = ctx.popularity;
        let mut out = list.clone();
        out.rescore(|entry| {
            let normalized = counts.normalized(&entry.item);
            match self.mode {
                IndividualMode::Preference => self.delta * normalized,
                IndividualMode::Norm => entry.score + self.delta * normalized,
                IndividualMode::Exponential => entry.score + (self.delta * normalized).powi(3),
                IndividualMode::Binary if normalized >= 0.75 => entry.score + self.delta,
                IndividualMode::Binary => entry.score,
            }
        })?;
        Ok(out)
    }
}

/// Registry with every built-in preference function.
pub fn registry() -> Result<StrategyRegistry<dyn PreferenceFunction>> {
    let mut reg = StrategyRegistry::new("preference function", Capabilities::NONE);
    reg.register("binary", Binary::from_props)?;
    reg.register("perturbed_binary", PerturbedBinary::from_props)?;
    reg.register("cascade", Cascade::from_props)?;
    reg.register("individual_preference", Individual::preference)?;
    reg.register("ind_norm", Individual::norm)?;
    reg.register("ind_exponential", Individual::exponential)?;
    reg.register("ind_binary", Individual::binary)?;
    Ok(reg)
}
