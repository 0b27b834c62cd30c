//! How relevant each agent is to the user of the current round.

use crate::context::AttributeLookup;
use crate::properties::PropertySet;
use crate::registry::{Capabilities, Strategy, StrategyRegistry};
use anyhow::Result;

pub trait CompatibilityMetric: Strategy {
    fn compute(&self, user: &str, attrs: &dyn AttributeLookup) -> f64;
}

/// Every agent is fully compatible with every user.
#[derive(Debug)]
pub struct AlwaysOne;

impl AlwaysOne {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn CompatibilityMetric>> {
        props.declare(&[], &[])?;
        Ok(Box::new(Self))
    }
}

impl Strategy for AlwaysOne {}

impl CompatibilityMetric for AlwaysOne {
    fn compute(&self, _user: &str, _attrs: &dyn AttributeLookup) -> f64 {
        1.0
    }
}

/// Reads the user's context entry `key`, falling back to `default`.
#[derive(Debug)]
pub struct UserContext {
    key: String,
    default: f64,
}

impl UserContext {
    pub fn from_props(props: &PropertySet) -> Result<Box<dyn CompatibilityMetric>> {
        props.declare(&["key"], &["default"])?;
        Ok(Box::new(Self {
            key: props.str("key")?.to_string(),
            default: props.f64_or("default", 0.0)?,
        }))
    }
}

impl Strategy for UserContext {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ATTRIBUTES
    }
}

impl CompatibilityMetric for UserContext {
    fn compute(&self, user: &str, attrs: &dyn AttributeLookup) -> f64 {
        attrs.user_context(user, &self.key).unwrap_or(self.default)
    }
}

pub fn registry() -> Result<StrategyRegistry<dyn CompatibilityMetric>> {
    let mut reg = StrategyRegistry::new("compatibility metric", Capabilities::NONE);
    reg.register("always_one", AlwaysOne::from_props)?;
    reg.register("user_context", UserContext::from_props)?;
    Ok(reg)
}
