use crate::context::FeatureDef;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    fs,
    ops::RangeBounds,
    path::{Path, PathBuf},
};
use toml::Table;

/// Experiment configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub parameters: ParamsConfig,
    pub data: DataConfig,

    /// Protected feature definitions, by name.
    #[serde(default)]
    pub feature: BTreeMap<String, FeatureDef>,

    /// Agents, instantiated in key order.
    pub agent: BTreeMap<String, AgentConfig>,

    pub choice: ChoiceConfig,
    pub allocation: AllocationConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Number of rounds per run.
    pub iterations: usize,
    /// Capacity of the rolling history.
    pub history_window_size: usize,
    /// Length of each final list (`0` keeps every item).
    #[serde(default)]
    pub list_size: usize,
    /// Seed of the run generator; drawn from the OS when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Input data file, relative to the simulation directory.
    pub input_file: PathBuf,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name; defaults to the agent's key.
    #[serde(default)]
    pub name: Option<String>,
    /// Initial weight; defaults to an equal share.
    #[serde(default)]
    pub weight: Option<f64>,

    pub preference_function_class: String,
    pub metric_class: String,
    #[serde(default = "default_compatibility_class")]
    pub compatibility_class: String,

    #[serde(default)]
    pub preference: Table,
    #[serde(default)]
    pub metric: Table,
    #[serde(default)]
    pub compatibility: Table,
}

fn default_compatibility_class() -> String {
    "always_one".to_string()
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ChoiceConfig {
    pub choice_class: String,
    /// Weight of the base recommender's own list among the ballots.
    #[serde(default = "default_recommender_weight")]
    pub recommender_weight: f64,
    #[serde(default)]
    pub properties: Table,
}

fn default_recommender_weight() -> f64 {
    1.0
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub allocation_class: String,
    #[serde(default)]
    pub properties: Table,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Persistence of the rank-biased overlap between base and final lists.
    #[serde(default = "default_rbo_persistence")]
    pub rbo_persistence: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rbo_persistence: default_rbo_persistence(),
        }
    }
}

fn default_rbo_persistence() -> f64 {
    0.9
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let par = &self.parameters;
        check_num(par.iterations, 1..=1_000_000).context("invalid number of iterations")?;
        check_num(par.history_window_size, 1..=100_000).context("invalid history window size")?;
        check_num(par.list_size, 0..=10_000).context("invalid list size")?;

        check_num(self.agent.len(), 1..=64).context("invalid number of agents")?;
        for (key, agt) in &self.agent {
            if let Some(weight) = agt.weight {
                check_num(weight, 0.0..=1.0)
                    .with_context(|| format!("invalid weight of agent {key:?}"))?;
            }
            for table in [&agt.preference, &agt.metric, &agt.compatibility] {
                check_feature_ref(table, &self.feature)
                    .with_context(|| format!("invalid feature of agent {key:?}"))?;
            }
        }

        check_num(self.choice.recommender_weight, 0.0..=1e6)
            .context("invalid recommender weight")?;
        check_num(self.analysis.rbo_persistence, 0.001..=0.999)
            .context("invalid rank-biased overlap persistence")?;

        Ok(())
    }

    /// Agent keys in instantiation order.
    pub fn agent_names(&self) -> Vec<String> {
        self.agent
            .iter()
            .map(|(key, agt)| agt.name.clone().unwrap_or_else(|| key.clone()))
            .collect()
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_feature_ref(props: &Table, features: &BTreeMap<String, FeatureDef>) -> Result<()> {
    let Some(feature) = props.get("feature") else {
        return Ok(());
    };
    let Some(feature) = feature.as_str() else {
        bail!("feature must be a string");
    };
    if !features.contains_key(feature) {
        bail!("feature {feature:?} is not defined");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const CONFIG: &str = r#"
[parameters]
iterations = 4
history_window_size = 3
list_size = 3
random_seed = 230629

[data]
input_file = "input.toml"

[feature.protected]
protected_feature = "feature1"
protected_values = ["a", "c"]

[agent.one]
preference_function_class = "binary"
metric_class = "proportional_item"
[agent.one.preference]
feature = "protected"
delta = 0.5
[agent.one.metric]
feature = "protected"
target = 0.5

[agent.two]
preference_function_class = "ind_norm"
metric_class = "gini"
[agent.two.preference]
delta = 0.5
[agent.two.metric]
target = 0.01

[choice]
recommender_weight = 1.0
choice_class = "weighted_scoring"

[allocation]
allocation_class = "least_fair"
"#;

    #[test]
    fn parses_and_validates() {
        let cfg = Config::from_toml(CONFIG).unwrap();
        assert_eq!(cfg.agent_names(), ["one", "two"]);
        assert_eq!(cfg.agent["one"].compatibility_class, "always_one");
        assert_eq!(cfg.feature["protected"].protected_values, ["a", "c"]);
        assert_eq!(cfg.parameters.random_seed, Some(230629));
        assert_eq!(cfg.analysis.rbo_persistence, 0.9);
    }

    #[test]
    fn rejects_degenerate_rbo_persistence() {
        let contents = format!("{CONFIG}\n[analysis]\nrbo_persistence = 1.0\n");
        assert!(Config::from_toml(&contents).is_err());
        let contents = format!("{CONFIG}\n[analysis]\nrbo_persistence = 0.5\n");
        assert_eq!(Config::from_toml(&contents).unwrap().analysis.rbo_persistence, 0.5);
    }

    #[test]
    fn rejects_zero_iterations() {
        let contents = CONFIG.replace("iterations = 4", "iterations = 0");
        assert!(Config::from_toml(&contents).is_err());
    }

    #[test]
    fn rejects_undefined_feature() {
        let contents = CONFIG.replace("feature = \"protected\"\ndelta", "feature = \"missing\"\ndelta");
        assert!(Config::from_toml(&contents).is_err());
    }

    #[test]
    fn scalar_protected_value_is_accepted() {
        let contents = CONFIG.replace("protected_values = [\"a\", \"c\"]", "protected_values = 1");
        let cfg = Config::from_toml(&contents).unwrap();
        assert_eq!(cfg.feature["protected"].protected_values, ["1"]);
    }
}
