//! Trial tracking and optimization run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_types::{validation_error, CalResult, ParameterSet};
use uuid::Uuid;

use crate::loss::LossOutcome;
use crate::search::SearchSpace;

/// Unique optimization run identifier.
pub type OptimizationId = Uuid;

/// Top-level configuration for one calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub id: OptimizationId,
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    /// Total number of objective evaluations.
    pub n_calls: usize,

    /// Pure-exploration evaluations before the model is used.
    pub n_initial_points: usize,

    /// Exploration weight for Bayesian search.
    pub exploration_weight: f64,

    /// Seed for reproducible proposals. `None` draws from the OS.
    pub random_seed: Option<u64>,

    pub created_at: DateTime<Utc>,
}

impl OptimizationConfig {
    pub fn new(name: String, search_space: SearchSpace) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            search_space,
            n_calls: 50,
            n_initial_points: 10,
            exploration_weight: 0.3,
            random_seed: Some(123),
            created_at: Utc::now(),
        }
    }

    pub fn with_calls(mut self, n_calls: usize, n_initial_points: usize) -> Self {
        self.n_calls = n_calls;
        self.n_initial_points = n_initial_points;
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.random_seed = seed;
        self
    }

    /// Initial random points left once `prior_count` priors are known.
    pub fn effective_initial_points(&self, prior_count: usize) -> usize {
        self.n_initial_points.saturating_sub(prior_count)
    }

    pub fn validate(&self) -> CalResult<()> {
        self.search_space.validate()?;
        if self.n_calls == 0 {
            return Err(validation_error!("n_calls must be at least 1"));
        }
        if self.n_initial_points > self.n_calls {
            return Err(validation_error!(
                "n_initial_points ({}) exceeds n_calls ({})",
                self.n_initial_points,
                self.n_calls
            ));
        }
        if !(0.0..=1.0).contains(&self.exploration_weight) {
            return Err(validation_error!(
                "exploration_weight must be within [0, 1], got {}",
                self.exploration_weight
            ));
        }
        Ok(())
    }
}

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: OptimizationId,
    pub config: OptimizationConfig,
    pub state: OptimizationState,
    pub priors_loaded: usize,
    pub trials_completed: usize,
    /// Trials scored with the penalty sentinel.
    pub trials_failed: usize,
    pub cache_hits: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: OptimizationState::Pending,
            priors_loaded: 0,
            trials_completed: 0,
            trials_failed: 0,
            cache_hits: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Fold a finished trial into the counters and best-so-far.
    pub fn record(&mut self, trial: &Trial) {
        let Some(result) = &trial.result else {
            return;
        };
        self.trials_completed += 1;
        if result.outcome.is_failure() {
            self.trials_failed += 1;
        }
        if result.cache_hit {
            self.cache_hits += 1;
        }
        self.update_best(result);
    }

    /// Update the best trial if `result` has a strictly lower loss. Failed
    /// outcomes never become best.
    pub fn update_best(&mut self, result: &TrialResult) {
        if result.outcome.is_failure() {
            return;
        }
        let improves = match &self.best_trial {
            None => true,
            Some(current_best) => result.outcome.value() < current_best.outcome.value(),
        };
        if improves {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one parameter set scored against the target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub optimization_id: OptimizationId,
    /// 1-based iteration number within the run.
    pub trial_number: usize,
    pub parameters: ParameterSet,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(optimization_id: OptimizationId, trial_number: usize, parameters: ParameterSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            optimization_id,
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, outcome: LossOutcome, cache_hit: bool) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        let duration_ms = self
            .started_at
            .map(|start| (Utc::now() - start).num_milliseconds().max(0) as u64);
        self.result = Some(TrialResult {
            trial_id: self.id,
            trial_number: self.trial_number,
            outcome,
            parameters: self.parameters.clone(),
            cache_hit,
            duration_ms,
        });
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    /// Aborted by an infrastructure failure; carries no score.
    Failed,
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub trial_number: usize,
    pub outcome: LossOutcome,
    pub parameters: ParameterSet,
    /// Served from the knowledge base without a simulation.
    pub cache_hit: bool,
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> OptimizationConfig {
        let space = SearchSpace::new()
            .add_float("emod", 1e9, 50e9)
            .add_float("kratio", 1.0, 5.0);

        OptimizationConfig::new("test_opt".into(), space).with_calls(20, 5)
    }

    fn completed(number: usize, outcome: LossOutcome, cache_hit: bool) -> Trial {
        let params = ParameterSet::new().with("emod", 1e10).unwrap();
        let mut trial = Trial::new(Uuid::new_v4(), number, params);
        trial.mark_running();
        trial.mark_completed(outcome, cache_hit);
        trial
    }

    #[test]
    fn optimization_status_lifecycle() {
        let mut status = OptimizationStatus::new(sample_config());

        assert_eq!(status.state, OptimizationState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, OptimizationState::Running);
        assert!(status.started_at.is_some());

        status.mark_completed();
        assert_eq!(status.state, OptimizationState::Completed);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn best_trial_tracks_lowest_loss() {
        let mut status = OptimizationStatus::new(sample_config());

        status.record(&completed(1, LossOutcome::Scored(1.5), false));
        assert_eq!(status.best_trial.as_ref().unwrap().outcome.value(), 1.5);

        status.record(&completed(2, LossOutcome::Scored(0.4), true));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 2);

        // Worse result should not replace
        status.record(&completed(3, LossOutcome::Scored(0.9), false));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 2);

        assert_eq!(status.trials_completed, 3);
        assert_eq!(status.cache_hits, 1);
    }

    #[test]
    fn penalized_trial_never_becomes_best() {
        let mut status = OptimizationStatus::new(sample_config());
        status.record(&completed(1, LossOutcome::failed("too short"), false));
        assert!(status.best_trial.is_none());
        assert_eq!(status.trials_failed, 1);
    }

    #[test]
    fn priors_reduce_initial_points() {
        let config = sample_config();
        assert_eq!(config.effective_initial_points(0), 5);
        assert_eq!(config.effective_initial_points(3), 2);
        assert_eq!(config.effective_initial_points(40), 0);
    }

    #[test]
    fn validate_checks_budget() {
        assert!(sample_config().validate().is_ok());
        assert!(sample_config().with_calls(3, 5).validate().is_err());
        assert!(sample_config().with_calls(0, 0).validate().is_err());
        assert!(sample_config().with_exploration_weight(1.5).validate().is_err());
    }

    #[test]
    fn trial_failure() {
        let mut trial = Trial::new(Uuid::new_v4(), 1, ParameterSet::new());
        trial.mark_running();
        trial.mark_failed("all workers unreachable".into());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error.as_deref(), Some("all workers unreachable"));
        assert!(trial.result.is_none());
    }
}
