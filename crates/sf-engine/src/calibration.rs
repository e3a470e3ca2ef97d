// Calibration run loop
// Drives one sequential optimization per target curve.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sf_data::{load_target_curve, KnowledgeStore};
use sf_optimizer::{
    BayesianSearch, LossFunction, OptimizationConfig, OptimizationStatus, SearchStrategy, Trial,
    WarmStartBuilder,
};
use sf_types::{CalError, CalResult, ParameterSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::CalibrationSettings;
use crate::gateway::SimulationBackend;
use crate::objective::{ObjectiveEvaluator, RunContext};

pub const BEST_PARAMETERS_FILE: &str = "best_parameters.json";
pub const TRIALS_FILE: &str = "trials.json";

/// Outcome of one completed calibration run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub target_name: String,
    pub results_dir: PathBuf,
    pub status: OptimizationStatus,
}

impl RunSummary {
    pub fn best_parameters(&self) -> Option<&ParameterSet> {
        self.status.best_trial.as_ref().map(|t| &t.parameters)
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.status.best_trial.as_ref().map(|t| t.outcome.value())
    }
}

#[derive(Serialize)]
struct RunReport<'a> {
    run_id: Uuid,
    target: &'a str,
    status: &'a OptimizationStatus,
    trials: &'a [Trial],
}

/// One optimization against one target curve.
pub struct CalibrationRun<B> {
    config: OptimizationConfig,
    evaluator: ObjectiveEvaluator<B>,
}

impl<B: SimulationBackend> CalibrationRun<B> {
    pub fn new(
        config: OptimizationConfig,
        store: Arc<KnowledgeStore>,
        backend: B,
        loss: Arc<dyn LossFunction>,
        context: RunContext,
    ) -> CalResult<Self> {
        config.validate()?;
        let evaluator = ObjectiveEvaluator::new(store, backend, loss, context);
        Ok(Self { config, evaluator })
    }

    /// Warm-start from the knowledge base, then spend the call budget.
    ///
    /// An unreachable worker pool aborts the run; results gathered so far are
    /// still written to the run directory.
    pub async fn execute(mut self) -> CalResult<RunSummary> {
        let context = self.evaluator.context().clone();
        info!(
            run_id = %context.run_id,
            target = %context.target_name,
            n_calls = self.config.n_calls,
            loss = self.evaluator.loss().name(),
            "starting calibration run"
        );

        let priors = WarmStartBuilder::new(
            self.config.search_space.clone(),
            Arc::clone(self.evaluator.loss()),
        )
        .build(self.evaluator.store(), &context.target)?;

        let initial_points = self.config.effective_initial_points(priors.len());
        if !priors.is_empty() {
            info!(
                priors = priors.len(),
                initial_points, "priors loaded, reducing random exploration"
            );
        }

        let mut strategy = BayesianSearch::new(
            self.config.search_space.clone(),
            self.config.exploration_weight,
            initial_points,
            self.config.random_seed,
        )
        .with_priors(&priors);

        let mut status = OptimizationStatus::new(self.config.clone());
        status.priors_loaded = priors.len();
        status.mark_running();
        let mut trials = Vec::with_capacity(self.config.n_calls);

        for trial_number in 1..=self.config.n_calls {
            let params = strategy.suggest(1).pop().ok_or_else(|| {
                CalError::Internal(format!("{} proposed no parameters", strategy.name()))
            })?;

            let mut trial = Trial::new(status.id, trial_number, params.clone());
            trial.mark_running();

            match self.evaluator.evaluate(&params).await {
                Ok(evaluation) => {
                    strategy.report(&params, evaluation.outcome.value());
                    trial.mark_completed(evaluation.outcome, evaluation.cache_hit);
                    let previous_best = status.best_trial.as_ref().map(|t| t.trial_id);
                    status.record(&trial);
                    if let Some(best) = &status.best_trial {
                        if previous_best != Some(best.trial_id) {
                            info!(
                                trial = trial_number,
                                loss = best.outcome.value(),
                                "new best parameters: {}",
                                best.parameters
                            );
                        }
                    }
                    trials.push(trial);
                }
                Err(e) => {
                    error!(trial = trial_number, error = %e, "calibration run aborted");
                    trial.mark_failed(e.to_string());
                    trials.push(trial);
                    status.mark_failed(e.to_string());
                    if let Err(write_err) = write_results(&context, &status, &trials) {
                        warn!(error = %write_err, "could not write partial results");
                    }
                    return Err(e);
                }
            }
        }

        status.mark_completed();
        write_results(&context, &status, &trials)?;

        match &status.best_trial {
            Some(best) => info!(
                run_id = %context.run_id,
                loss = best.outcome.value(),
                cache_hits = status.cache_hits,
                "calibration finished, best parameters: {}",
                best.parameters
            ),
            None => warn!(
                run_id = %context.run_id,
                "calibration finished without a successful evaluation"
            ),
        }

        Ok(RunSummary {
            run_id: context.run_id,
            target_name: context.target_name.clone(),
            results_dir: context.results_dir.clone(),
            status,
        })
    }
}

fn write_results(
    context: &RunContext,
    status: &OptimizationStatus,
    trials: &[Trial],
) -> CalResult<()> {
    if let Some(best) = &status.best_trial {
        let path = context.results_dir.join(BEST_PARAMETERS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&best.parameters)?)?;
        info!(path = %path.display(), "best parameters saved");
    }

    let report = RunReport {
        run_id: context.run_id,
        target: &context.target_name,
        status,
        trials,
    };
    let path = context.results_dir.join(TRIALS_FILE);
    fs::write(&path, serde_json::to_vec_pretty(&report)?)?;
    Ok(())
}

fn target_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Calibrate against every configured target, one run after another.
///
/// The knowledge base is shared by all runs. A fatal error (unreachable
/// workers, unreadable target) stops the remaining runs.
pub async fn calibrate_targets<B>(
    settings: &CalibrationSettings,
    backend: Arc<B>,
) -> CalResult<Vec<RunSummary>>
where
    B: SimulationBackend + ?Sized,
{
    settings.validate()?;
    let store = Arc::new(
        KnowledgeStore::open(&settings.knowledge_base)?.with_cache_version(settings.cache_version),
    );
    let loss = settings.loss.build();

    let mut summaries = Vec::with_capacity(settings.targets.len());
    for (index, path) in settings.targets.iter().enumerate() {
        info!(
            target = %path.display(),
            run = index + 1,
            of = settings.targets.len(),
            "loading target curve"
        );
        let target = load_target_curve(path)?;
        let name = target_name(path);

        let config = settings.optimization_config(&name);
        let context = RunContext::create(
            config.id,
            name,
            target,
            &settings.results_dir,
            config.n_calls,
        )?;

        let run = CalibrationRun::new(
            config,
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(&loss),
            context,
        )?;
        match run.execute().await {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                if e.is_fatal() {
                    error!(
                        remaining = settings.targets.len() - index - 1,
                        "aborting remaining calibration runs"
                    );
                }
                return Err(e);
            }
        }
    }

    let stats = store.get_stats();
    info!(
        runs = summaries.len(),
        hits = stats.hits,
        misses = stats.misses,
        stored = stats.stores,
        "all calibration runs finished"
    );
    Ok(summaries)
}
