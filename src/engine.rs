use crate::agent::Agent;
use crate::allocation::{AllocationInput, AllocationMechanism};
use crate::choice::{Ballot, ChoiceMechanism};
use crate::config::Config;
use crate::context::{AttributeLookup, PopularityCounts, RoundContext};
use crate::error::{ConfigError, ensure_finite};
use crate::history::History;
use crate::properties::PropertySet;
use crate::registry::Registries;
use crate::results::ResultList;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::encode;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Step of the round state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    BaseRecommend,
    PerAgentRescore,
    Allocate,
    Choose,
    AppendHistory,
}

impl Phase {
    pub fn next(self) -> Self {
        match self {
            Phase::Idle => Phase::BaseRecommend,
            Phase::BaseRecommend => Phase::PerAgentRescore,
            Phase::PerAgentRescore => Phase::Allocate,
            Phase::Allocate => Phase::Choose,
            Phase::Choose => Phase::AppendHistory,
            Phase::AppendHistory => Phase::Idle,
        }
    }
}

/// Outcome of one completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub user: String,
    /// List received from the base recommender.
    pub base: ResultList,
    /// Final list produced by the choice mechanism.
    pub output: ResultList,
    /// Agent weights assigned this round, in agent order.
    pub weights: Vec<f64>,
    /// Agent fairness the allocation saw, in agent order.
    pub fairness: Vec<f64>,
}

/// Simulation state of one experiment run.
///
/// Owns the history, the attribute lookup, the random number generator and
/// the agents, and runs rounds against base lists supplied by the caller.
/// Runs never share a state, so independent runs may proceed in parallel.
pub struct SimulationState {
    history: History,
    attrs: Box<dyn AttributeLookup>,
    rng: ChaCha12Rng,
    agents: Vec<Agent>,
    choice: Box<dyn ChoiceMechanism>,
    allocation: Box<dyn AllocationMechanism>,
    recommender_weight: f64,
    list_size: usize,
    iterations: usize,
    phase: Phase,
    round: usize,
}

impl SimulationState {
    /// Build every strategy named by `cfg` and seed the generator.
    ///
    /// Any configuration error surfaces here, before the first round.
    pub fn new(cfg: &Config, registries: &Registries, attrs: Box<dyn AttributeLookup>) -> Result<Self> {
        let rng = match cfg.parameters.random_seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let n_agt = cfg.agent.len();
        let mut agents = Vec::with_capacity(n_agt);
        for (key, agt_cfg) in &cfg.agent {
            let agent = Agent::from_config(key, agt_cfg, 1.0 / n_agt as f64, registries)
                .with_context(|| format!("failed to create agent {key:?}"))?;
            log::debug!("created agent {:?} with {:?}", agent.name(), agent.props());
            agents.push(agent);
        }

        let choice = registries
            .choice
            .create(
                &cfg.choice.choice_class,
                &PropertySet::new(&cfg.choice.choice_class, cfg.choice.properties.clone()),
            )
            .context("failed to create choice mechanism")?;
        let allocation = registries
            .allocation
            .create(
                &cfg.allocation.allocation_class,
                &PropertySet::new(&cfg.allocation.allocation_class, cfg.allocation.properties.clone()),
            )
            .context("failed to create allocation mechanism")?;

        log::info!(
            "created simulation with {n_agt} agents, choice {:?}, allocation {:?}",
            cfg.choice.choice_class,
            cfg.allocation.allocation_class
        );

        Ok(Self {
            history: History::new(cfg.parameters.history_window_size),
            attrs,
            rng,
            agents,
            choice,
            allocation,
            recommender_weight: cfg.choice.recommender_weight,
            list_size: cfg.parameters.list_size,
            iterations: cfg.parameters.iterations,
            phase: Phase::Idle,
            round: 0,
        })
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the configured number of rounds and collect their records.
    pub fn perform_rounds(&mut self, inputs: &[ResultList]) -> Result<Vec<RoundRecord>> {
        let mut records = Vec::with_capacity(self.iterations);
        self.for_each_round(inputs, |record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }

    /// Run the configured number of rounds and save every round record to a binary file.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, inputs: &[ResultList], file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        self.for_each_round(inputs, |record| {
            encode::write(&mut writer, &record).context("failed to serialize round record")
        })?;

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    fn for_each_round<F>(&mut self, inputs: &[ResultList], mut sink: F) -> Result<()>
    where
        F: FnMut(RoundRecord) -> Result<()>,
    {
        if inputs.len() < self.iterations {
            return Err(ConfigError::MalformedResultList {
                user: String::new(),
                reason: format!(
                    "{} rounds configured but only {} base lists supplied",
                    self.iterations,
                    inputs.len()
                ),
            }
            .into());
        }

        let progress_step = (self.iterations / 10).max(1);
        for (i_round, base) in inputs.iter().take(self.iterations).enumerate() {
            let record = self
                .perform_round(base.clone())
                .with_context(|| format!("failed to perform round {i_round}"))?;
            sink(record)?;

            if (i_round + 1) % progress_step == 0 {
                let progress = 100.0 * (i_round + 1) as f64 / self.iterations as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        Ok(())
    }

    /// Run one round over `base` and append its final list to the history.
    ///
    /// Preference functions and fairness metrics only see the history of
    /// earlier rounds. A failed round leaves the history untouched and the
    /// state back in [`Phase::Idle`].
    pub fn perform_round(&mut self, base: ResultList) -> Result<RoundRecord> {
        let result = self.step_round(base);
        if result.is_err() {
            self.phase = Phase::Idle;
        }
        result
    }

    fn step_round(&mut self, base: ResultList) -> Result<RoundRecord> {
        self.advance(Phase::BaseRecommend)?;
        // Frozen for the whole round.
        let popularity = PopularityCounts::snapshot(&self.history, self.attrs.as_ref());

        self.advance(Phase::PerAgentRescore)?;
        let views = self.rescore_per_agent(&base, &popularity)?;

        self.advance(Phase::Allocate)?;
        let fairness = self.allocate(base.user())?;

        self.advance(Phase::Choose)?;
        let weights: Vec<f64> = self.agents.iter().map(Agent::weight).collect();
        let mut ballots: Vec<Ballot> = Vec::with_capacity(views.len() + 1);
        ballots.push((self.recommender_weight, &base));
        ballots.extend(weights.iter().copied().zip(&views));
        let mut output = self
            .choice
            .combine(&ballots, &mut self.rng)
            .context("failed to combine agent lists")?;
        output.truncate(self.list_size);

        self.advance(Phase::AppendHistory)?;
        self.history.append(output.clone());
        let record = RoundRecord {
            round: self.round,
            user: base.user().to_string(),
            base,
            output,
            weights,
            fairness,
        };
        self.round += 1;
        self.advance(Phase::Idle)?;

        log::debug!(
            "round {} user {:?}: weights {:?}, fairness {:?}",
            record.round,
            record.user,
            record.weights,
            record.fairness
        );

        Ok(record)
    }

    fn rescore_per_agent(&mut self, base: &ResultList, popularity: &PopularityCounts) -> Result<Vec<ResultList>> {
        let mut views = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let mut ctx = RoundContext {
                history: &self.history,
                attrs: self.attrs.as_ref(),
                popularity,
                rng: &mut self.rng,
            };
            let view = agent
                .preference()
                .compute(base, &mut ctx)
                .with_context(|| format!("failed to rescore for agent {:?}", agent.name()))?;
            if !view.same_items(base) {
                bail!("agent {:?} changed the entry set of its list", agent.name());
            }
            views.push(view);
        }
        Ok(views)
    }

    /// Update agent weights from their current fairness and return that fairness.
    fn allocate(&mut self, user: &str) -> Result<Vec<f64>> {
        let mut fairness = Vec::with_capacity(self.agents.len());
        let mut compatibility = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let fair = agent.metric().evaluate(&self.history, self.attrs.as_ref());
            fairness.push(ensure_finite(fair, &format!("fairness metric of agent {:?}", agent.name()))?);
            let compat = agent.compatibility().compute(user, self.attrs.as_ref());
            compatibility.push(ensure_finite(
                compat,
                &format!("compatibility metric of agent {:?}", agent.name()),
            )?);
        }
        let weights: Vec<f64> = self.agents.iter().map(Agent::weight).collect();

        let input = AllocationInput {
            weights: &weights,
            fairness: &fairness,
            compatibility: &compatibility,
        };
        let new_weights = self
            .allocation
            .allocate(&input, &mut self.rng)
            .context("failed to allocate agent weights")?;
        if new_weights.len() != self.agents.len() {
            bail!(
                "allocation returned {} weights for {} agents",
                new_weights.len(),
                self.agents.len()
            );
        }

        for (agent, weight) in self.agents.iter_mut().zip(new_weights) {
            agent.set_weight(ensure_finite(weight, "allocation mechanism")?);
        }
        Ok(fairness)
    }

    fn advance(&mut self, to: Phase) -> Result<()> {
        if self.phase.next() != to {
            bail!("invalid round transition from {:?} to {to:?}", self.phase);
        }
        self.phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::CONFIG;
    use crate::context::ItemFeatures;
    use crate::data::{InputData, tests::INPUT};
    use crate::preference::{Individual, IndividualMode, PreferenceFunction};
    use crate::registry::{Capabilities, Strategy};
    use std::cell::RefCell;

    fn setup(config: &str) -> (SimulationState, Vec<ResultList>) {
        setup_with(config, &Registries::with_builtins().unwrap())
    }

    fn setup_with(config: &str, registries: &Registries) -> (SimulationState, Vec<ResultList>) {
        let cfg = Config::from_toml(config).unwrap();
        let data: InputData = toml::from_str(INPUT).unwrap();
        let state = SimulationState::new(&cfg, registries, Box::new(input_features(&cfg))).unwrap();
        (state, data.base_lists().unwrap())
    }

    fn input_features(cfg: &Config) -> ItemFeatures {
        let data: InputData = toml::from_str(INPUT).unwrap();
        data.features(cfg.feature.clone())
    }

    thread_local! {
        static SEEN: RefCell<Vec<PopularityCounts>> = const { RefCell::new(Vec::new()) };
    }

    /// `ind_norm` that also records the popularity snapshot it was handed.
    struct RecordingNorm(Individual);

    impl Strategy for RecordingNorm {
        fn capabilities(&self) -> Capabilities {
            self.0.capabilities()
        }
    }

    impl PreferenceFunction for RecordingNorm {
        fn compute(&self, list: &ResultList, ctx: &mut RoundContext) -> Result<ResultList> {
            SEEN.with_borrow_mut(|seen| seen.push(ctx.popularity.clone()));
            self.0.compute(list, ctx)
        }
    }

    fn recording_norm(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        props.declare(&["delta"], &["feature"])?;
        let delta = props.f64("delta")?;
        Ok(Box::new(RecordingNorm(Individual::new(IndividualMode::Norm, delta))))
    }

    /// Drops entries from the lists of user `u1` only.
    struct DropsForU1;

    impl Strategy for DropsForU1 {}

    impl PreferenceFunction for DropsForU1 {
        fn compute(&self, list: &ResultList, _ctx: &mut RoundContext) -> Result<ResultList> {
            let mut out = list.clone();
            if list.user() == "u1" {
                out.truncate(1);
            }
            Ok(out)
        }
    }

    fn drops_for_u1(props: &PropertySet) -> Result<Box<dyn PreferenceFunction>> {
        props.declare(&[], &["feature", "delta"])?;
        Ok(Box::new(DropsForU1))
    }

    #[test]
    fn rounds_see_only_earlier_history() {
        let (mut state, inputs) = setup(CONFIG);
        for (i_round, base) in inputs.iter().enumerate() {
            assert_eq!(state.history().len(), i_round.min(3));
            let record = state.perform_round(base.clone()).unwrap();
            assert_eq!(record.round, i_round);
            assert_eq!(state.phase(), Phase::Idle);
        }
        assert_eq!(state.history().len(), 3);
    }

    #[test]
    fn first_round_is_neutral_and_weights_sum_to_one() {
        let (mut state, inputs) = setup(CONFIG);
        let records = state.perform_rounds(&inputs).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].fairness, [1.0, 1.0]);
        for record in &records {
            assert!((record.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!(record.output.len() <= 3);
        }
        // Agent two's coverage stays well under its target, so least-fair picks it.
        assert_eq!(records[1].weights, [0.0, 1.0]);
    }

    #[test]
    fn runs_replay_for_a_seed() {
        let config = CONFIG
            .replace("choice_class = \"weighted_scoring\"", "choice_class = \"voting\"\n[choice.properties]\nrule = \"borda\"")
            .replace("allocation_class = \"least_fair\"", "allocation_class = \"product_lottery\"");
        let (mut state_a, inputs) = setup(&config);
        let (mut state_b, _) = setup(&config);
        assert_eq!(
            state_a.perform_rounds(&inputs).unwrap(),
            state_b.perform_rounds(&inputs).unwrap()
        );
    }

    #[test]
    fn too_few_inputs_fail_before_the_first_round() {
        let (mut state, inputs) = setup(CONFIG);
        assert!(state.perform_rounds(&inputs[..2]).is_err());
        assert!(state.history().is_empty());
    }

    #[test]
    fn unknown_strategy_fails_at_construction() {
        let config = CONFIG.replace("metric_class = \"gini\"", "metric_class = \"true_gini\"");
        let cfg = Config::from_toml(&config).unwrap();
        let registries = Registries::with_builtins().unwrap();
        let err = SimulationState::new(&cfg, &registries, Box::new(ItemFeatures::default()))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnregisteredStrategyClass { .. })
        ));
    }

    #[test]
    fn agents_share_one_snapshot_without_the_current_round() {
        let config = CONFIG
            .replace("\"binary\"", "\"recording_norm\"")
            .replace("\"ind_norm\"", "\"recording_norm\"");
        let mut registries = Registries::with_builtins().unwrap();
        registries
            .preference
            .register("recording_norm", recording_norm)
            .unwrap();
        let (mut state, inputs) = setup_with(&config, &registries);
        assert_eq!(state.agents().len(), 2);
        let attrs = input_features(&Config::from_toml(&config).unwrap());

        for base in &inputs {
            let before = PopularityCounts::snapshot(state.history(), &attrs);
            SEEN.with_borrow_mut(Vec::clear);
            state.perform_round(base.clone()).unwrap();

            let seen = SEEN.take();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0], seen[1]);
            assert_eq!(seen[0], before);
            let after = PopularityCounts::snapshot(state.history(), &attrs);
            assert_ne!(seen[0], after);
        }
    }

    #[test]
    fn failed_round_returns_to_idle() {
        let config = CONFIG.replace("\"binary\"", "\"drops_for_u1\"");
        let mut registries = Registries::with_builtins().unwrap();
        registries
            .preference
            .register("drops_for_u1", drops_for_u1)
            .unwrap();
        let (mut state, inputs) = setup_with(&config, &registries);

        assert!(state.perform_round(inputs[0].clone()).is_err());
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.history().is_empty());

        let record = state.perform_round(inputs[1].clone()).unwrap();
        assert_eq!(record.round, 0);
        assert_eq!(state.history().len(), 1);
    }
}
