//! Calibration settings: JSON file plus `STRAINFIT_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sf_data::LEGACY_CACHE_VERSION;
use sf_optimizer::{LossKind, OptimizationConfig, SearchSpace};
use sf_types::{config_error, CalResult};

use crate::gateway::WorkerEndpoint;

pub const ENV_WORKERS: &str = "STRAINFIT_WORKERS";
pub const ENV_HANDSHAKE_TIMEOUT: &str = "STRAINFIT_HANDSHAKE_TIMEOUT_SECS";
pub const ENV_KNOWLEDGE_BASE: &str = "STRAINFIT_KNOWLEDGE_BASE";
pub const ENV_RESULTS_DIR: &str = "STRAINFIT_RESULTS_DIR";
pub const ENV_TARGETS: &str = "STRAINFIT_TARGETS";

/// Everything a calibration session needs. Every field has a default, so a
/// settings file only has to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Simulation workers, tried in order.
    pub workers: Vec<WorkerEndpoint>,
    /// Bound on connect, send and acknowledgement for each worker.
    pub handshake_timeout_secs: u64,
    pub knowledge_base: PathBuf,
    /// Knowledge records written under another version are ignored.
    pub cache_version: u32,
    pub results_dir: PathBuf,
    /// Target curve CSV files; one calibration run each.
    pub targets: Vec<PathBuf>,
    pub loss: LossKind,
    pub search_space: SearchSpace,
    pub n_calls: usize,
    pub n_initial_points: usize,
    pub exploration_weight: f64,
    pub random_seed: Option<u64>,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            workers: vec![WorkerEndpoint::new("127.0.0.1", 50009)],
            handshake_timeout_secs: 10,
            knowledge_base: PathBuf::from("knowledge_base"),
            cache_version: LEGACY_CACHE_VERSION,
            results_dir: PathBuf::from("4_optimization_results"),
            targets: vec![PathBuf::from("target_data").join("111.txt.csv")],
            loss: LossKind::Dtw,
            search_space: SearchSpace::contact_model(),
            n_calls: 50,
            n_initial_points: 10,
            exploration_weight: 0.3,
            random_seed: Some(123),
        }
    }
}

impl CalibrationSettings {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read settings {}: {e}", path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| config_error!("invalid settings {}: {e}", path.display()))
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> CalResult<Self> {
        let settings = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `STRAINFIT_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> CalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = split_list(&workers)
                .map(str::parse)
                .collect::<CalResult<Vec<WorkerEndpoint>>>()?;
        }
        if let Some(secs) = lookup(ENV_HANDSHAKE_TIMEOUT) {
            self.handshake_timeout_secs = secs
                .trim()
                .parse()
                .map_err(|e| config_error!("{ENV_HANDSHAKE_TIMEOUT}={secs}: {e}"))?;
        }
        if let Some(dir) = lookup(ENV_KNOWLEDGE_BASE) {
            self.knowledge_base = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_RESULTS_DIR) {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(targets) = lookup(ENV_TARGETS) {
            self.targets = split_list(&targets).map(PathBuf::from).collect();
        }
        Ok(self)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn validate(&self) -> CalResult<()> {
        if self.workers.is_empty() {
            return Err(config_error!("at least one simulation worker is required"));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(config_error!("handshake timeout must be positive"));
        }
        if self.targets.is_empty() {
            return Err(config_error!("no target curves configured"));
        }
        if self.n_initial_points > self.n_calls {
            return Err(config_error!(
                "n_initial_points ({}) exceeds n_calls ({})",
                self.n_initial_points,
                self.n_calls
            ));
        }
        if let LossKind::Keypoint {
            w_peak_point,
            w_max_strain,
        } = self.loss
        {
            if !(w_peak_point >= 0.0 && w_max_strain >= 0.0) {
                return Err(config_error!("loss weights must be non-negative"));
            }
        }
        self.search_space
            .validate()
            .map_err(|e| config_error!("search space: {e}"))
    }

    /// Optimizer configuration for one run.
    pub fn optimization_config(&self, name: &str) -> OptimizationConfig {
        OptimizationConfig::new(name.to_string(), self.search_space.clone())
            .with_calls(self.n_calls, self.n_initial_points)
            .with_exploration_weight(self.exploration_weight)
            .with_seed(self.random_seed)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}
