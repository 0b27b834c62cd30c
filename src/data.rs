//! Input data for a run: base recommendations and item side information.

use crate::context::{FeatureDef, ItemFeatures, value_key};
use crate::results::ResultList;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    /// `(user, item, score)` triples; consecutive triples of one user form
    /// that user's base list.
    pub recommendations: Vec<(String, String, f64)>,

    /// Item attributes, by item.
    #[serde(default)]
    pub items: BTreeMap<String, BTreeMap<String, toml::Value>>,

    /// Base item popularity.
    #[serde(default)]
    pub popularity: BTreeMap<String, f64>,

    /// Per-user context values read by compatibility metrics.
    #[serde(default)]
    pub user_context: BTreeMap<String, BTreeMap<String, f64>>,
}

impl InputData {
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        toml::from_str(&contents).context("failed to deserialize input data")
    }

    /// Group the triples into one base list per consecutive user run.
    pub fn base_lists(&self) -> Result<Vec<ResultList>> {
        let mut lists = Vec::new();
        for group in self.recommendations.chunk_by(|a, b| a.0 == b.0) {
            let list = ResultList::from_triples(
                group
                    .iter()
                    .map(|(user, item, score)| (user.as_str(), item.as_str(), *score)),
            )
            .with_context(|| format!("invalid base list {}", lists.len()))?;
            lists.push(list);
        }
        Ok(lists)
    }

    /// Attribute lookup over this data for the given feature definitions.
    pub fn features(&self, features: BTreeMap<String, FeatureDef>) -> ItemFeatures {
        let mut lookup = ItemFeatures::new(features);
        for (item, attrs) in &self.items {
            let attrs = attrs
                .iter()
                .map(|(key, val)| (key.clone(), value_key(val)))
                .collect();
            lookup.set_item(item, attrs);
        }
        for (item, &val) in &self.popularity {
            lookup.set_popularity(item, val);
        }
        for (user, ctx) in &self.user_context {
            for (key, &val) in ctx {
                lookup.set_user_context(user, key, val);
            }
        }
        lookup
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::AttributeLookup;

    pub(crate) const INPUT: &str = r#"
recommendations = [
    ["u1", "i1", 3.5], ["u1", "i2", 2.5], ["u1", "i3", 1.5],
    ["u2", "i4", 3.5], ["u2", "i2", 2.5], ["u2", "i1", 2.5],
    ["u3", "i3", 1.5], ["u3", "i1", 3.5], ["u3", "i4", 3.5],
    ["u4", "i3", 1.5], ["u4", "i1", 3.5], ["u4", "i5", 3.5],
]

[items.i1]
feature1 = "a"
feature3 = 1
[items.i2]
feature1 = "b"
feature3 = 1
[items.i3]
feature1 = "a"
[items.i4]
feature1 = "b"
[items.i5]
feature1 = "a"

[popularity]
i1 = 2.0
"#;

    #[test]
    fn groups_triples_per_user() {
        let data: InputData = toml::from_str(INPUT).unwrap();
        let lists = data.base_lists().unwrap();
        assert_eq!(lists.len(), 4);
        assert_eq!(lists[2].user(), "u3");
        assert_eq!(lists[2].items().collect::<Vec<_>>(), ["i1", "i4", "i3"]);
    }

    #[test]
    fn builds_attribute_lookup() {
        let data: InputData = toml::from_str(INPUT).unwrap();
        let def = FeatureDef {
            protected_feature: "feature3".to_string(),
            protected_values: vec!["1".to_string()],
        };
        let attrs = data.features(BTreeMap::from([("binary".to_string(), def)]));
        assert!(attrs.has_protected_attribute("i2", "binary"));
        assert!(!attrs.has_protected_attribute("i3", "binary"));
        assert_eq!(attrs.popularity("i1"), 2.0);
    }
}
