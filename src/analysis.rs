use crate::agent::Agent;
use crate::config::Config;
use crate::context::AttributeLookup;
use crate::engine::RoundRecord;
use crate::history::History;
use crate::kernel::{MetricKernel, NativeKernel, gini_of_items, ndcg_of_items, rank_biased_overlap};
use crate::registry::Registries;
use crate::stats::{Accumulator, TimeSeries};
use anyhow::{Context, Result};
use rmp_serde::decode;
use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    rc::Rc,
};

pub trait Obs {
    fn update(&mut self, record: &RoundRecord) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// nDCG of each final list, with the base scores as relevance.
pub struct Ndcg {
    kernel: Rc<dyn MetricKernel>,
    acc: Accumulator,
}

impl Ndcg {
    pub fn new(kernel: Rc<dyn MetricKernel>) -> Self {
        Self {
            kernel,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for Ndcg {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        let items: Vec<&str> = record.base.items().collect();
        let scores: Vec<f64> = record.base.entries().iter().map(|e| e.score).collect();
        let rec: Vec<&str> = record.output.items().collect();
        // Base lists are kept sorted by descending score.
        self.acc
            .add(ndcg_of_items(self.kernel.as_ref(), &items, &scores, &rec, true));
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "ndcg": self.acc.report() })
    }
}

/// Gini index of how often each item appears across all final lists.
pub struct ExposureGini {
    kernel: Rc<dyn MetricKernel>,
    observed: Vec<String>,
}

impl ExposureGini {
    pub fn new(kernel: Rc<dyn MetricKernel>) -> Self {
        Self {
            kernel,
            observed: Vec::new(),
        }
    }
}

impl Obs for ExposureGini {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        self.observed
            .extend(record.output.items().map(str::to_string));
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let observed: Vec<&str> = self.observed.iter().map(String::as_str).collect();
        serde_json::json!({ "exposure_gini": gini_of_items(self.kernel.as_ref(), &observed) })
    }
}

/// Rank-biased overlap between each base list and its final list.
pub struct Rbo {
    persistence: f64,
    acc: Accumulator,
}

impl Rbo {
    pub fn new(cfg: &Config) -> Self {
        Self {
            persistence: cfg.analysis.rbo_persistence,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for Rbo {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        let base: Vec<&str> = record.base.items().collect();
        let output: Vec<&str> = record.output.items().collect();
        if let Some(rbo) = rank_biased_overlap(&base, &output, self.persistence) {
            self.acc.add(rbo);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "rbo": self.acc.report() })
    }
}

/// Share of the distinct base items that reached some final list.
pub struct Coverage {
    base: BTreeSet<String>,
    output: BTreeSet<String>,
}

impl Coverage {
    pub fn new() -> Self {
        Self {
            base: BTreeSet::new(),
            output: BTreeSet::new(),
        }
    }
}

impl Obs for Coverage {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        self.base.extend(record.base.items().map(str::to_string));
        self.output.extend(record.output.items().map(str::to_string));
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        if self.base.is_empty() {
            return serde_json::json!({});
        }
        let coverage = self.output.len() as f64 / self.base.len() as f64;
        serde_json::json!({ "coverage": coverage })
    }
}

/// Per-agent weight statistics.
pub struct AgentWeights {
    names: Vec<String>,
    acc_vec: Vec<Accumulator>,
}

impl AgentWeights {
    pub fn new(cfg: &Config) -> Self {
        let names = cfg.agent_names();
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(names.len(), Accumulator::new);
        Self { names, acc_vec }
    }
}

impl Obs for AgentWeights {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        anyhow::ensure!(
            record.weights.len() == self.acc_vec.len(),
            "record has {} weights for {} agents",
            record.weights.len(),
            self.acc_vec.len()
        );
        for (acc, &weight) in self.acc_vec.iter_mut().zip(&record.weights) {
            acc.add(weight);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: serde_json::Map<_, _> = self
            .names
            .iter()
            .zip(&self.acc_vec)
            .map(|(name, acc)| (name.clone(), serde_json::json!(acc.report())))
            .collect();
        serde_json::json!({ "agent_weight": reports })
    }
}

/// Per-agent fairness as seen by the allocation each round.
pub struct AgentFairness {
    names: Vec<String>,
    series_vec: Vec<TimeSeries>,
}

impl AgentFairness {
    pub fn new(cfg: &Config) -> Self {
        let names = cfg.agent_names();
        let mut series_vec = Vec::new();
        series_vec.resize_with(names.len(), TimeSeries::new);
        Self { names, series_vec }
    }
}

impl Obs for AgentFairness {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        anyhow::ensure!(
            record.fairness.len() == self.series_vec.len(),
            "record has {} fairness values for {} agents",
            record.fairness.len(),
            self.series_vec.len()
        );
        for (series, &fair) in self.series_vec.iter_mut().zip(&record.fairness) {
            series.push(fair);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: serde_json::Map<_, _> = self
            .names
            .iter()
            .zip(&self.series_vec)
            .map(|(name, series)| (name.clone(), serde_json::json!(series.report())))
            .collect();
        serde_json::json!({ "agent_fairness": reports })
    }
}

/// Every agent's fairness metric over the history the run ends with.
pub struct FinalFairness {
    history: History,
    attrs: Box<dyn AttributeLookup>,
    agents: Vec<Agent>,
}

impl FinalFairness {
    pub fn new(
        cfg: &Config,
        registries: &Registries,
        attrs: Box<dyn AttributeLookup>,
    ) -> Result<Self> {
        let n_agt = cfg.agent.len();
        let agents: Vec<Agent> = cfg
            .agent
            .iter()
            .map(|(key, agt_cfg)| {
                Agent::from_config(key, agt_cfg, 1.0 / n_agt as f64, registries)
                    .with_context(|| format!("failed to create agent {key:?}"))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            history: History::new(cfg.parameters.history_window_size),
            attrs,
            agents,
        })
    }
}

impl Obs for FinalFairness {
    fn update(&mut self, record: &RoundRecord) -> Result<()> {
        self.history.append(record.output.clone());
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let attrs = self.attrs.as_ref();
        let reports: serde_json::Map<_, _> = self
            .agents
            .iter()
            .map(|agent| {
                let report = serde_json::json!({
                    "evaluate": agent.metric().evaluate(&self.history, attrs),
                    "evaluate_test": agent.metric().evaluate_test(&self.history, attrs),
                });
                (agent.name().to_string(), report)
            })
            .collect();
        serde_json::json!({ "final_fairness": reports })
    }
}

/// Folds the round records of one run into summary statistics.
pub struct Analyzer {
    cfg: Config,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
    n_records: usize,
}

impl Analyzer {
    /// Analyzer over runs of `cfg`, reading item attributes from `attrs`.
    pub fn new(cfg: Config, attrs: Box<dyn AttributeLookup>) -> Result<Self> {
        Self::with_kernel(cfg, attrs, Rc::new(NativeKernel))
    }

    pub fn with_kernel(
        cfg: Config,
        attrs: Box<dyn AttributeLookup>,
        kernel: Rc<dyn MetricKernel>,
    ) -> Result<Self> {
        let registries = Registries::with_builtins().context("failed to register strategies")?;
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(Ndcg::new(Rc::clone(&kernel))),
            Box::new(Rbo::new(&cfg)),
            Box::new(ExposureGini::new(kernel)),
            Box::new(Coverage::new()),
            Box::new(AgentWeights::new(&cfg)),
            Box::new(AgentFairness::new(&cfg)),
            Box::new(FinalFairness::new(&cfg, &registries, attrs)?),
        ];
        Ok(Self {
            cfg,
            obs_ptr_vec,
            n_records: 0,
        })
    }

    pub fn add_record(&mut self, record: &RoundRecord) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(record).context("failed to update observable")?;
        }
        self.n_records += 1;
        Ok(())
    }

    /// Read the records of a trajectory file written by a full run.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for i_round in 0..self.cfg.parameters.iterations {
            let record: RoundRecord = decode::from_read(&mut reader)
                .with_context(|| format!("failed to read record of round {i_round}"))?;
            self.add_record(&record)?;
        }
        Ok(())
    }

    pub fn report(&self) -> serde_json::Value {
        let mut results = serde_json::Map::new();
        results.insert("n_rounds".to_string(), self.n_records.into());
        for obs in &self.obs_ptr_vec {
            if let serde_json::Value::Object(map) = obs.report() {
                results.extend(map);
            }
        }
        serde_json::Value::Object(results)
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &self.report())
            .context("failed to serialize results")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::CONFIG;
    use crate::data::{InputData, tests::INPUT};
    use crate::results::ResultList;

    fn record(round: usize, output: &[(&str, f64)]) -> RoundRecord {
        RoundRecord {
            round,
            user: "u1".to_string(),
            base: ResultList::from_scores("u1", [("i1", 3.0), ("i2", 2.0), ("i3", 1.0), ("i4", 0.5)])
                .unwrap(),
            output: ResultList::from_scores("u1", output.iter().copied()).unwrap(),
            weights: vec![0.25, 0.75],
            fairness: vec![1.0, 0.5],
        }
    }

    fn analyzer() -> Analyzer {
        let cfg = Config::from_toml(CONFIG).unwrap();
        let data: InputData = toml::from_str(INPUT).unwrap();
        let attrs = Box::new(data.features(cfg.feature.clone()));
        Analyzer::new(cfg, attrs).unwrap()
    }

    #[test]
    fn summarizes_records() {
        let mut analyzer = analyzer();
        analyzer
            .add_record(&record(0, &[("i1", 3.0), ("i2", 2.0)]))
            .unwrap();
        analyzer
            .add_record(&record(1, &[("i1", 3.0), ("i3", 2.0)]))
            .unwrap();

        let results = analyzer.report();
        assert_eq!(results["n_rounds"], 2);
        assert_eq!(results["coverage"], 0.75);
        assert!(results["ndcg"]["mean"].as_f64().unwrap() <= 1.0);
        assert_eq!(results["agent_weight"]["two"]["mean"], 0.75);
        assert_eq!(results["agent_fairness"]["one"]["last"], 1.0);
        assert!(results["exposure_gini"].as_f64().unwrap() > 0.0);

        assert_eq!(results["rbo"]["n_vals"], 2);
        let rbo = results["rbo"]["mean"].as_f64().unwrap();
        assert!(rbo > 0.5 && rbo < 1.0);
    }

    #[test]
    fn scores_the_final_history_with_every_metric() {
        let mut analyzer = analyzer();
        analyzer
            .add_record(&record(0, &[("i1", 3.0), ("i2", 2.0)]))
            .unwrap();
        analyzer
            .add_record(&record(1, &[("i1", 3.0), ("i3", 2.0)]))
            .unwrap();

        let fairness = &analyzer.report()["final_fairness"];
        // Three protected entries (i1, i1, i3) out of four, over a 0.5 target.
        assert_eq!(fairness["one"]["evaluate"], 1.5);
        assert_eq!(fairness["one"]["evaluate_test"], 1.5);
        let coverage = fairness["two"]["evaluate"].as_f64().unwrap();
        assert!((coverage - 3.0 / 2000.0 / 0.01).abs() < 1e-12);
        assert_eq!(fairness["two"]["evaluate_test"], 1.0);
    }

    #[test]
    fn undefined_metrics_are_left_out() {
        let results = analyzer().report();
        assert_eq!(results["n_rounds"], 0);
        assert!(results.get("coverage").is_none());
        assert!(results["ndcg"].get("mean").is_none());
    }

    #[test]
    fn rejects_records_of_another_agent_count() {
        let mut analyzer = analyzer();
        let mut rec = record(0, &[("i1", 3.0)]);
        rec.weights.push(0.0);
        assert!(analyzer.add_record(&rec).is_err());
    }
}
