//! Fairness metrics evaluated over the accumulated history.

use crate::context::AttributeLookup;
use crate::error::ConfigError;
use crate::history::{History, Window};
use crate::properties::PropertySet;
use crate::registry::{Capabilities, Strategy, StrategyRegistry};
use anyhow::Result;
use std::collections::HashSet;

/// Score returned when there is no history to judge.
pub const NEUTRAL_FAIRNESS: f64 = 1.0;

pub trait FairnessMetric: Strategy {
    /// Fairness of the retained history; `1.0` means the target is met.
    fn evaluate(&self, history: &History, attrs: &dyn AttributeLookup) -> f64;

    /// Fairness reported by offline test-mode evaluation.
    fn evaluate_test(&self, history: &History, attrs: &dyn AttributeLookup) -> f64 {
        self.evaluate(history, attrs)
    }
}

fn positive_target(props: &PropertySet) -> Result<f64> {
    let target = props.f64("target")?;
    if target <= 0.0 {
        return Err(ConfigError::InvalidPropertyValue {
            strategy: props.strategy().to_string(),
            property: "target".to_string(),
            expected: "a positive number",
        }
        .into());
    }
    Ok(target)
}

/// Share of protected items among all recommended entries, relative to `target`.
///
/// Unbounded above: values over 1.0 mean the target share is exceeded.
#[derive(Debug)]
pub struct ProportionalItem {
    feature: String,
    target: f64,
    window: Window,
}

impl ProportionalItem {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn FairnessMetric>> {
        props.declare(&["feature", "target"], &["window"])?;
        let window = match props.usize_or("window", 0)? {
            0 => Window::All,
            n => Window::Last(n),
        };
        Ok(Box::new(Self {
            feature: props.str("feature")?.to_string(),
            target: positive_target(props)?,
            window,
        }))
    }
}

impl Strategy for ProportionalItem {
    fn capabilities(&self) -> Capabilities {
        Capabilities::HISTORY.union(Capabilities::ATTRIBUTES)
    }
}

impl FairnessMetric for ProportionalItem {
    fn evaluate(&self, history: &History, attrs: &dyn AttributeLookup) -> f64 {
        let mut n_total = 0usize;
        let mut n_protected = 0usize;
        for list in history.recent(self.window) {
            for item in list.items() {
                n_total += 1;
                if attrs.has_protected_attribute(item, &self.feature) {
                    n_protected += 1;
                }
            }
        }
        if n_total == 0 {
            return NEUTRAL_FAIRNESS;
        }
        (n_protected as f64 / n_total as f64) / self.target
    }
}

/// Catalogue-size constant the coverage ratio divides by.
pub const COVERAGE_CATALOG_SIZE: f64 = 2000.0;

/// Item coverage relative to `target`, registered as `gini`.
///
/// This is not the Gini coefficient: it counts distinct items across the
/// whole history, divides by [`COVERAGE_CATALOG_SIZE`] and then by `target`.
/// The offline analysis computes a classical Gini index through
/// [`crate::kernel::MetricKernel`].
#[derive(Debug)]
pub struct CoverageRatio {
    target: f64,
}

impl CoverageRatio {
    pub fn new(target: f64) -> Self {
        Self { target }
    }

    pub fn from_props(props: &PropertySet) -> Result<Box<dyn FairnessMetric>> {
        props.declare(&["target"], &[])?;
        Ok(Box::new(Self::new(positive_target(props)?)))
    }
}

impl Strategy for CoverageRatio {
    fn capabilities(&self) -> Capabilities {
        Capabilities::HISTORY
    }
}

impl FairnessMetric for CoverageRatio {
    fn evaluate(&self, history: &History, _attrs: &dyn AttributeLookup) -> f64 {
        if history.is_empty() {
            return NEUTRAL_FAIRNESS;
        }
        let distinct: HashSet<&str> = history
            .recent(Window::All)
            .flat_map(|list| list.items())
            .collect();
        distinct.len() as f64 / COVERAGE_CATALOG_SIZE / self.target
    }

    fn evaluate_test(&self, _history: &History, _attrs: &dyn AttributeLookup) -> f64 {
        NEUTRAL_FAIRNESS
    }
}

/// Registry with every built-in fairness metric. All of them must read history.
pub fn registry() -> Result<StrategyRegistry<dyn FairnessMetric>> {
    let mut reg = StrategyRegistry::new("fairness metric", Capabilities::HISTORY);
    reg.register("proportional_item", ProportionalItem::from_props)?;
    reg.register("gini", CoverageRatio::from_props)?;
    Ok(reg)
}
