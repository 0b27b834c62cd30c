//! Name-based construction of pluggable strategies.

use crate::allocation::{self, AllocationMechanism};
use crate::choice::{self, ChoiceMechanism};
use crate::compatibility::{self, CompatibilityMetric};
use crate::error::ConfigError;
use crate::fairness::{self, FairnessMetric};
use crate::preference::{self, PreferenceFunction};
use crate::properties::PropertySet;
use anyhow::Result;
use std::{collections::BTreeMap, fmt};

/// Inputs a strategy consumes beyond its direct arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const HISTORY: Self = Self(1 << 0);
    pub const ATTRIBUTES: Self = Self(1 << 1);
    pub const POPULARITY: Self = Self(1 << 2);
    pub const RANDOM: Self = Self(1 << 3);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::HISTORY, "history"),
        (Self::ATTRIBUTES, "attributes"),
        (Self::POPULARITY, "popularity"),
        (Self::RANDOM, "random"),
    ];

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Self::NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap) && *cap != Self::NONE)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Common surface of every pluggable strategy.
pub trait Strategy {
    /// The extra inputs this strategy reads.
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }
}

pub type Constructor<T> = fn(&PropertySet) -> Result<Box<T>>;

/// Table from strategy name to constructor for one strategy family.
///
/// Lookups fail closed: an unknown name is always an error.
pub struct StrategyRegistry<T: ?Sized + Strategy> {
    family: &'static str,
    required: Capabilities,
    ctors: BTreeMap<String, Constructor<T>>,
}

impl<T: ?Sized + Strategy> StrategyRegistry<T> {
    /// Empty registry for `family`; products must provide `required`.
    pub fn new(family: &'static str, required: Capabilities) -> Self {
        Self {
            family,
            required,
            ctors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, ctor: Constructor<T>) -> Result<()> {
        if self.ctors.contains_key(name) {
            return Err(ConfigError::DuplicateRegistration {
                family: self.family,
                name: name.to_string(),
            }
            .into());
        }
        self.ctors.insert(name.to_string(), ctor);
        Ok(())
    }

    pub fn create(&self, name: &str, props: &PropertySet) -> Result<Box<T>> {
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| ConfigError::UnregisteredStrategyClass {
                family: self.family,
                name: name.to_string(),
            })?;
        let product = ctor(props)?;
        let caps = product.capabilities();
        if !caps.contains(self.required) {
            return Err(ConfigError::InvalidStrategyClass {
                family: self.family,
                name: name.to_string(),
                missing: self.required.difference(caps).to_string(),
            }
            .into());
        }
        Ok(product)
    }
}

/// One registry per strategy family, as used to build a simulation.
pub struct Registries {
    pub preference: StrategyRegistry<dyn PreferenceFunction>,
    pub fairness: StrategyRegistry<dyn FairnessMetric>,
    pub compatibility: StrategyRegistry<dyn CompatibilityMetric>,
    pub choice: StrategyRegistry<dyn ChoiceMechanism>,
    pub allocation: StrategyRegistry<dyn AllocationMechanism>,
}

impl Registries {
    /// Registries holding every built-in strategy.
    ///
    /// Further strategies can be registered on the returned value before it
    /// is handed to [`crate::engine::SimulationState::new`].
    pub fn with_builtins() -> Result<Self> {
        Ok(Self {
            preference: preference::registry()?,
            fairness: fairness::registry()?,
            compatibility: compatibility::registry()?,
            choice: choice::registry()?,
            allocation: allocation::registry()?,
        })
    }
}
