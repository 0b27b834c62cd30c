use crate::compatibility::CompatibilityMetric;
use crate::config::AgentConfig;
use crate::fairness::FairnessMetric;
use crate::preference::PreferenceFunction;
use crate::properties::PropertySet;
use crate::registry::Registries;
use anyhow::{Context, Result};
use toml::Table;

/// One stakeholder: a preference function, the fairness metric it is judged
/// by, a compatibility metric and its current weight.
///
/// Only the weight changes during a run.
pub struct Agent {
    name: String,
    weight: f64,
    preference: Box<dyn PreferenceFunction>,
    metric: Box<dyn FairnessMetric>,
    compatibility: Box<dyn CompatibilityMetric>,
    props: PropertySet,
}

impl Agent {
    /// Build the agent configured under `key`.
    ///
    /// `default_weight` applies when the configuration sets no weight.
    pub fn from_config(
        key: &str,
        agt_cfg: &AgentConfig,
        default_weight: f64,
        registries: &Registries,
    ) -> Result<Self> {
        let props = agent_props(key, agt_cfg);
        props.declare(
            &["preference_function_class", "metric_class"],
            &["name", "weight", "compatibility_class"],
        )?;

        let class = props.str("preference_function_class")?;
        let preference = registries
            .preference
            .create(class, &PropertySet::new(class, agt_cfg.preference.clone()))
            .context("failed to create preference function")?;

        let class = props.str("metric_class")?;
        let metric = registries
            .fairness
            .create(class, &PropertySet::new(class, agt_cfg.metric.clone()))
            .context("failed to create fairness metric")?;

        let class = props.str_or("compatibility_class", "always_one")?;
        let compatibility = registries
            .compatibility
            .create(class, &PropertySet::new(class, agt_cfg.compatibility.clone()))
            .context("failed to create compatibility metric")?;

        Ok(Self {
            name: props.str_or("name", key)?.to_string(),
            weight: props.f64_or("weight", default_weight)?,
            preference,
            metric,
            compatibility,
            props,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    pub fn preference(&self) -> &dyn PreferenceFunction {
        self.preference.as_ref()
    }

    pub fn metric(&self) -> &dyn FairnessMetric {
        self.metric.as_ref()
    }

    pub fn compatibility(&self) -> &dyn CompatibilityMetric {
        self.compatibility.as_ref()
    }

    /// Agent-level properties: strategy classes, name and initial weight.
    pub fn props(&self) -> &PropertySet {
        &self.props
    }
}

fn agent_props(key: &str, agt_cfg: &AgentConfig) -> PropertySet {
    let mut table = Table::new();
    if let Some(name) = &agt_cfg.name {
        table.insert("name".to_string(), name.clone().into());
    }
    if let Some(weight) = agt_cfg.weight {
        table.insert("weight".to_string(), weight.into());
    }
    table.insert(
        "preference_function_class".to_string(),
        agt_cfg.preference_function_class.clone().into(),
    );
    table.insert("metric_class".to_string(), agt_cfg.metric_class.clone().into());
    table.insert(
        "compatibility_class".to_string(),
        agt_cfg.compatibility_class.clone().into(),
    );
    PropertySet::new(format!("agent {key:?}"), table)
}
