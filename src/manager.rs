use crate::analysis::Analyzer;
use crate::config::Config;
use crate::data::InputData;
use crate::engine::SimulationState;
use crate::registry::Registries;
use anyhow::{Context, Result};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Runs and analyzes the experiment of one simulation directory.
///
/// The directory holds `config.toml`, the input data file it names and one
/// `run-XXXX` directory per run.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::debug!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Run the experiment once more in a fresh run directory.
    pub fn create_run(&self) -> Result<()> {
        let data = self.load_data()?;
        let inputs = data.base_lists().context("failed to build base lists")?;
        let attrs = Box::new(data.features(self.cfg.feature.clone()));

        let registries = Registries::with_builtins().context("failed to register strategies")?;
        let mut state = SimulationState::new(&self.cfg, &registries, attrs)
            .context("failed to construct simulation state")?;

        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;
        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        state
            .perform_simulation(&inputs, self.trajectory_file(run_idx))
            .context("failed to perform simulation")?;
        for agent in state.agents() {
            log::info!("agent {:?} ends with weight {}", agent.name(), agent.weight());
        }

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let data = self.load_data()?;
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let attrs = Box::new(data.features(self.cfg.feature.clone()));
            let mut analyzer = Analyzer::new(self.cfg.clone(), attrs)
                .context("failed to construct analyzer")?;
            analyzer
                .add_file(self.trajectory_file(run_idx))
                .context("failed to add file")?;
            analyzer
                .save_results(self.results_file(run_idx))
                .context("failed to save results")?;
            log::info!("analyzed {:?}", self.run_dir(run_idx));
        }

        Ok(())
    }

    /// Remove every run directory.
    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.run_dirs()? {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }
        Ok(())
    }

    fn load_data(&self) -> Result<InputData> {
        let data_file = self.sim_dir.join(&self.cfg.data.input_file);
        InputData::from_file(&data_file).with_context(|| format!("failed to load {data_file:?}"))
    }

    fn run_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let dirs = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|path| path.is_dir())
            .collect();
        Ok(dirs)
    }

    fn count_run_dirs(&self) -> Result<usize> {
        Ok(self.run_dirs()?.len())
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn trajectory_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("trajectory.msgpack")
    }

    fn results_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("results.json")
    }
}
