//! The objective the optimizer minimizes: knowledge base lookup, remote
//! simulation on a miss, then scoring against the run's target curve.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sf_data::KnowledgeStore;
pub use sf_optimizer::MIN_CURVE_SAMPLES;
use sf_optimizer::{LossFunction, LossOutcome};
use sf_types::{CalResult, Curve, ParameterSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::gateway::SimulationBackend;

/// Everything one calibration run owns: its target, its output directory and
/// its progress through the call budget.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub target_name: String,
    pub target: Arc<Curve>,
    pub results_dir: PathBuf,
    pub iteration: usize,
    pub budget: usize,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        target_name: impl Into<String>,
        target: Curve,
        results_dir: PathBuf,
        budget: usize,
    ) -> Self {
        Self {
            run_id,
            target_name: target_name.into(),
            target: Arc::new(target),
            results_dir,
            iteration: 0,
            budget,
            started_at: Utc::now(),
        }
    }

    /// Create `run_<YYYY-mm-dd_HH-MM-SS>` under `results_root` and a context
    /// pointing at it. Runs started within the same second get a numeric
    /// suffix.
    pub fn create(
        run_id: Uuid,
        target_name: impl Into<String>,
        target: Curve,
        results_root: &Path,
        budget: usize,
    ) -> CalResult<Self> {
        let mut context = Self::new(run_id, target_name, target, PathBuf::new(), budget);
        fs::create_dir_all(results_root)?;

        let stem = format!("run_{}", context.started_at.format("%Y-%m-%d_%H-%M-%S"));
        let mut candidate = results_root.join(&stem);
        let mut suffix = 1;
        loop {
            match fs::create_dir(&candidate) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    candidate = results_root.join(format!("{stem}_{suffix}"));
                    suffix += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            run_id = %context.run_id,
            target = %context.target_name,
            dir = %candidate.display(),
            "results directory created"
        );
        context.results_dir = candidate;
        Ok(context)
    }
}

/// Result of scoring one parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcome: LossOutcome,
    /// The curve came from the knowledge base; no simulation ran.
    pub cache_hit: bool,
}

/// Composes the knowledge base, a simulation backend and a loss.
pub struct ObjectiveEvaluator<B> {
    store: Arc<KnowledgeStore>,
    backend: B,
    loss: Arc<dyn LossFunction>,
    context: RunContext,
}

impl<B: SimulationBackend> ObjectiveEvaluator<B> {
    pub fn new(
        store: Arc<KnowledgeStore>,
        backend: B,
        loss: Arc<dyn LossFunction>,
        context: RunContext,
    ) -> Self {
        Self {
            store,
            backend,
            loss,
            context,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn loss(&self) -> &Arc<dyn LossFunction> {
        &self.loss
    }

    /// Score `params` against the target.
    ///
    /// Returns `Err` only when no simulation worker is reachable; every
    /// other failure is scored as [`LossOutcome::Failed`].
    pub async fn evaluate(&mut self, params: &ParameterSet) -> CalResult<Evaluation> {
        self.context.iteration += 1;
        let iteration = self.context.iteration;
        info!(
            iteration,
            budget = self.context.budget,
            "evaluating parameters: {params}"
        );

        let (curve, cache_hit) = match self.lookup(params) {
            Some(curve) => (curve, true),
            None => match self.backend.simulate(params).await {
                Ok(curve) => (curve, false),
                Err(e) if e.is_fatal() => {
                    error!(iteration, error = %e, "simulation infrastructure unavailable");
                    return Err(e);
                }
                Err(e) => {
                    warn!(iteration, error = %e, "simulation failed, scoring with penalty");
                    return Ok(Evaluation {
                        outcome: LossOutcome::failed(e.to_string()),
                        cache_hit: false,
                    });
                }
            },
        };

        if let Some(outcome) = LossOutcome::short_curve(&curve) {
            warn!(
                iteration,
                samples = curve.len(),
                "simulated curve too short, scoring with penalty"
            );
            return Ok(Evaluation { outcome, cache_hit });
        }

        if !cache_hit {
            // A failed write loses the cache entry, not the evaluation.
            if let Err(e) = self.store.put(params, &curve) {
                warn!(iteration, error = %e, "could not cache simulated curve");
            }
        }

        let outcome = self.loss.evaluate(&self.context.target, &curve);
        info!(iteration, loss = %outcome, cache_hit, "evaluation finished");
        Ok(Evaluation { outcome, cache_hit })
    }

    fn lookup(&self, params: &ParameterSet) -> Option<Curve> {
        match self.store.get(params) {
            Ok(Some(curve)) => {
                info!(
                    fingerprint = %params.fingerprint().short(),
                    "knowledge base hit, skipping simulation"
                );
                Some(curve)
            }
            Ok(None) => {
                debug!(fingerprint = %params.fingerprint().short(), "knowledge base miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "knowledge base lookup failed, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sf_optimizer::{DtwLoss, PENALTY_LOSS};
    use sf_types::{CalError, SimulationFailure};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend double that counts calls and replays a scripted response.
    struct ScriptedBackend {
        calls: AtomicUsize,
        response: Mutex<Box<dyn Fn() -> CalResult<Curve> + Send>>,
    }

    impl ScriptedBackend {
        fn new(response: impl Fn() -> CalResult<Curve> + Send + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Mutex::new(Box::new(response)),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SimulationBackend for ScriptedBackend {
        async fn simulate(&self, _params: &ParameterSet) -> CalResult<Curve> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.response.lock())()
        }
    }

    fn target() -> Curve {
        Curve::from_columns(
            vec![0.0, 0.001, 0.002, 0.003, 0.004, 0.005],
            vec![0.0, 10.0, 19.0, 26.0, 30.0, 31.0],
        )
        .unwrap()
    }

    fn params(emod: f64) -> ParameterSet {
        ParameterSet::new()
            .with("emod", emod)
            .unwrap()
            .with("kratio", 2.0)
            .unwrap()
    }

    fn evaluator(
        dir: &Path,
        backend: Arc<ScriptedBackend>,
    ) -> ObjectiveEvaluator<Arc<ScriptedBackend>> {
        let store = Arc::new(KnowledgeStore::open(dir.join("kb")).unwrap());
        let context = RunContext::new(Uuid::new_v4(), "test", target(), dir.join("run"), 10);
        ObjectiveEvaluator::new(store, backend, Arc::new(DtwLoss), context)
    }

    #[tokio::test]
    async fn cache_hit_skips_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(|| Ok(target()));
        let mut eval = evaluator(dir.path(), Arc::clone(&backend));

        let p = params(1e10);
        eval.store().put(&p, &target()).unwrap();

        let result = eval.evaluate(&p).await.unwrap();
        assert!(result.cache_hit);
        assert_eq!(result.outcome, LossOutcome::Scored(0.0));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn miss_simulates_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(|| Ok(target()));
        let mut eval = evaluator(dir.path(), Arc::clone(&backend));
        let p = params(2e10);

        let first = eval.evaluate(&p).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(backend.calls(), 1);
        assert_eq!(eval.store().get(&p).unwrap(), Some(target()));

        let second = eval.evaluate(&p).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.outcome, first.outcome);
        assert_eq!(backend.calls(), 1);
        assert_eq!(eval.context().iteration, 2);
    }

    #[tokio::test]
    async fn short_curve_is_penalized_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(|| {
            Ok(Curve::from_columns(vec![0.0, 0.001, 0.002], vec![0.0, 1.0, 2.0]).unwrap())
        });
        let mut eval = evaluator(dir.path(), Arc::clone(&backend));
        let p = params(3e10);

        let result = eval.evaluate(&p).await.unwrap();
        assert!(result.outcome.is_failure());
        assert_eq!(result.outcome.value(), PENALTY_LOSS);
        assert_eq!(eval.store().get(&p).unwrap(), None);

        // Nothing was cached, so a retry simulates again.
        eval.evaluate(&p).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn empty_curve_is_penalized() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(|| Ok(Curve::empty()));
        let mut eval = evaluator(dir.path(), backend);

        let result = eval.evaluate(&params(4e10)).await.unwrap();
        assert_eq!(result.outcome.value(), PENALTY_LOSS);
    }

    #[tokio::test]
    async fn unreachable_workers_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(|| {
            Err(CalError::WorkersUnreachable {
                attempted: 2,
                last_error: "connection refused".into(),
            })
        });
        let mut eval = evaluator(dir.path(), backend);

        let err = eval.evaluate(&params(5e10)).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn other_errors_become_penalty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(|| Err(SimulationFailure::NoSamples.into()));
        let mut eval = evaluator(dir.path(), backend);

        let result = eval.evaluate(&params(6e10)).await.unwrap();
        assert!(result.outcome.is_failure());
        assert!(!result.cache_hit);
    }

    #[test]
    fn run_directories_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = RunContext::create(Uuid::new_v4(), "a", target(), dir.path(), 5).unwrap();
        let b = RunContext::create(Uuid::new_v4(), "b", target(), dir.path(), 5).unwrap();

        assert!(a.results_dir.is_dir());
        assert!(b.results_dir.is_dir());
        assert_ne!(a.results_dir, b.results_dir);
        let name = a.results_dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("run_"));
    }
}
