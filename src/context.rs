//! Read-only side data visible to strategies during a round.

use crate::history::{History, Window};
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Item attribute and popularity lookup, loaded before the run starts.
pub trait AttributeLookup {
    /// Whether `item` carries the protected value of the feature named `feature`.
    fn has_protected_attribute(&self, item: &str, feature: &str) -> bool;

    /// Base popularity of `item`, `0.0` when unknown.
    fn popularity(&self, item: &str) -> f64;

    /// Every item with a base popularity entry.
    fn popularity_items(&self) -> Vec<(&str, f64)>;

    /// Context value describing how well `user` matches the agent keyed by `key`.
    fn user_context(&self, _user: &str, _key: &str) -> Option<f64> {
        None
    }
}

/// Definition of one protected feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    /// Item attribute this feature inspects.
    pub protected_feature: String,
    /// Attribute values that mark an item as protected.
    #[serde(deserialize_with = "one_or_many")]
    pub protected_values: Vec<String>,
}

fn one_or_many<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val = toml::Value::deserialize(de)?;
    Ok(match val {
        toml::Value::Array(vals) => vals.iter().map(value_key).collect(),
        val => vec![value_key(&val)],
    })
}

/// String form used to compare attribute values of any TOML type.
pub fn value_key(val: &toml::Value) -> String {
    match val {
        toml::Value::String(val) => val.clone(),
        toml::Value::Integer(val) => val.to_string(),
        toml::Value::Float(val) => val.to_string(),
        toml::Value::Boolean(val) => val.to_string(),
        val => format!("{val:?}"),
    }
}

/// In-memory [`AttributeLookup`] over item features, popularity and user context.
#[derive(Debug, Clone, Default)]
pub struct ItemFeatures {
    features: BTreeMap<String, FeatureDef>,
    items: HashMap<String, HashMap<String, String>>,
    popularity: BTreeMap<String, f64>,
    user_context: HashMap<String, HashMap<String, f64>>,
}

impl ItemFeatures {
    pub fn new(features: BTreeMap<String, FeatureDef>) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    pub fn with_item<'a>(
        mut self,
        item: &str,
        attrs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.set_item(
            item,
            attrs
                .into_iter()
                .map(|(key, val)| (key.to_string(), val.to_string()))
                .collect(),
        );
        self
    }

    pub fn set_item(&mut self, item: &str, attrs: HashMap<String, String>) {
        self.items.insert(item.to_string(), attrs);
    }

    pub fn set_popularity(&mut self, item: &str, popularity: f64) {
        self.popularity.insert(item.to_string(), popularity);
    }

    pub fn set_user_context(&mut self, user: &str, key: &str, val: f64) {
        self.user_context
            .entry(user.to_string())
            .or_default()
            .insert(key.to_string(), val);
    }
}

impl AttributeLookup for ItemFeatures {
    fn has_protected_attribute(&self, item: &str, feature: &str) -> bool {
        let Some(def) = self.features.get(feature) else {
            return false;
        };
        self.items
            .get(item)
            .and_then(|attrs| attrs.get(&def.protected_feature))
            .is_some_and(|val| def.protected_values.contains(val))
    }

    fn popularity(&self, item: &str) -> f64 {
        self.popularity.get(item).copied().unwrap_or(0.0)
    }

    fn popularity_items(&self) -> Vec<(&str, f64)> {
        self.popularity
            .iter()
            .map(|(item, &val)| (item.as_str(), val))
            .collect()
    }

    fn user_context(&self, user: &str, key: &str) -> Option<f64> {
        self.user_context.get(user)?.get(key).copied()
    }
}

/// Frozen item exposure counts for one round.
///
/// Base popularity plus one count per appearance in every retained history
/// list. Built once before any agent rescores and never touched afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopularityCounts {
    counts: BTreeMap<String, f64>,
}

impl PopularityCounts {
    pub fn snapshot(history: &History, attrs: &dyn AttributeLookup) -> Self {
        let mut counts: BTreeMap<String, f64> = attrs
            .popularity_items()
            .into_iter()
            .map(|(item, val)| (item.to_string(), val))
            .collect();
        for list in history.recent(Window::All) {
            for item in list.items() {
                *counts.entry(item.to_string()).or_insert(0.0) += 1.0;
            }
        }
        Self { counts }
    }

    pub fn frequency(&self, item: &str) -> f64 {
        self.counts.get(item).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `(min, max)` over all counted items, `None` when nothing is counted.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let mut vals = self.counts.values().copied();
        let first = vals.next()?;
        Some(vals.fold((first, first), |(lo, hi), val| (lo.min(val), hi.max(val))))
    }

    /// Popularity of `item` rescaled so the least exposed item maps to 1.0
    /// and the most exposed to 0.0.
    ///
    /// Falls back to 1.0 when every count is equal or nothing is counted.
    pub fn normalized(&self, item: &str) -> f64 {
        match self.bounds() {
            Some((min, max)) if max != min => (max - self.frequency(item)) / (max - min),
            _ => 1.0,
        }
    }
}

/// Everything a preference function may read in one round.
pub struct RoundContext<'a> {
    pub history: &'a History,
    pub attrs: &'a dyn AttributeLookup,
    pub popularity: &'a PopularityCounts,
    pub rng: &'a mut ChaCha12Rng,
}
