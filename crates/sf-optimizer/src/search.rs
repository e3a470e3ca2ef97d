//! Search space definitions and sequential search strategies.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sf_types::{
    validation_error, CalResult, ParameterSet, EMOD, KRATIO, PB_COH, PB_EMOD, PB_FRIC, PB_TEN,
};
use tracing::{debug, warn};

use crate::warm_start::WarmStart;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as the simulator expects it (e.g. "pb_coh").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
}

impl ParameterKind {
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Self::FloatRange { low, high } | Self::LogUniform { low, high } => (low, high),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let (low, high) = self.bounds();
        value >= low && value <= high
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            Self::FloatRange { low, high } => rng.gen_range(low..=high),
            Self::LogUniform { low, high } => {
                let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                log_val.exp().clamp(low, high)
            }
        }
    }

    /// Random step of up to 10% of the range around `value`, kept in bounds.
    fn perturb<R: Rng>(&self, value: f64, rng: &mut R) -> f64 {
        match *self {
            Self::FloatRange { low, high } => {
                let noise = rng.gen_range(-0.1..0.1) * (high - low);
                (value + noise).clamp(low, high)
            }
            Self::LogUniform { low, high } => {
                let log_range = high.ln() - low.ln();
                let noise = rng.gen_range(-0.1..0.1) * log_range;
                (value.ln() + noise).exp().clamp(low, high)
            }
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
///
/// The order fixes the layout of the plain vectors exchanged with the
/// optimizer (prior observations, best point).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    /// The six contact micro-properties with their default calibration bounds.
    pub fn contact_model() -> Self {
        Self::new()
            .add_float(EMOD, 1e9, 50e9)
            .add_float(KRATIO, 1.0, 5.0)
            .add_float(PB_EMOD, 5e9, 100e9)
            .add_float(PB_FRIC, 0.3, 1.0)
            .add_float(PB_COH, 10e6, 200e6)
            .add_float(PB_TEN, 10e6, 200e6)
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Check that the space itself is well formed.
    pub fn validate(&self) -> CalResult<()> {
        if self.parameters.is_empty() {
            return Err(validation_error!("search space has no parameters"));
        }
        for (i, param) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(validation_error!("parameter '{}' defined twice", param.name));
            }
            let (low, high) = param.kind.bounds();
            if !(low.is_finite() && high.is_finite() && low < high) {
                return Err(validation_error!(
                    "parameter '{}' needs finite bounds with low < high, got [{low}, {high}]",
                    param.name
                ));
            }
            if matches!(param.kind, ParameterKind::LogUniform { .. }) && low <= 0.0 {
                return Err(validation_error!(
                    "log-uniform parameter '{}' needs a positive lower bound",
                    param.name
                ));
            }
        }
        Ok(())
    }

    /// Whether `params` has exactly this space's fields, each within bounds.
    pub fn contains(&self, params: &ParameterSet) -> bool {
        params.len() == self.parameters.len()
            && self
                .parameters
                .iter()
                .all(|def| params.get(&def.name).is_some_and(|v| def.kind.contains(v)))
    }

    /// Project a parameter set onto this space's ordering. `None` if a field
    /// is missing.
    pub fn to_vector(&self, params: &ParameterSet) -> Option<Vec<f64>> {
        self.parameters
            .iter()
            .map(|def| params.get(&def.name))
            .collect()
    }

    pub fn from_vector(&self, values: &[f64]) -> CalResult<ParameterSet> {
        if values.len() != self.parameters.len() {
            return Err(validation_error!(
                "expected {} values, got {}",
                self.parameters.len(),
                values.len()
            ));
        }
        ParameterSet::from_pairs(
            self.parameters
                .iter()
                .zip(values)
                .map(|(def, v)| (def.name.clone(), *v)),
        )
    }

    fn sample_one<R: Rng>(&self, rng: &mut R) -> ParameterSet {
        let mut params = ParameterSet::new();
        for def in &self.parameters {
            // Sampled values are finite for a validated space.
            let _ = params.insert(def.name.clone(), def.kind.sample(rng));
        }
        params
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies. Losses are always minimized.
pub trait SearchStrategy: Send {
    /// Generate the next batch of parameter sets to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet>;

    /// Report an observed loss so adaptive strategies can learn.
    fn report(&mut self, _params: &ParameterSet, _loss: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: seeded_rng(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count)
            .map(|_| self.space.sample_one(&mut self.rng))
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (surrogate-model stub) ----

/// Sequential model-based search.
///
/// Tracks every observed (parameters, loss) pair, including warm-start
/// priors. The first `n_initial_points` proposals are pure exploration; after
/// that each proposal explores with probability `exploration_weight` and
/// otherwise perturbs the lowest-loss observation. A full Gaussian-process
/// backend can replace the heuristic behind the same trait.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    observations: Vec<(ParameterSet, f64)>,
    exploration_weight: f64,
    n_initial_points: usize,
    proposed: usize,
    rng: ChaCha8Rng,
}

impl BayesianSearch {
    pub fn new(
        space: SearchSpace,
        exploration_weight: f64,
        n_initial_points: usize,
        seed: Option<u64>,
    ) -> Self {
        Self {
            space,
            observations: Vec::new(),
            exploration_weight,
            n_initial_points,
            proposed: 0,
            rng: seeded_rng(seed),
        }
    }

    /// Seed the model with previously known observations. Priors whose
    /// vectors do not fit the space are skipped.
    pub fn with_priors(mut self, priors: &WarmStart) -> Self {
        for (x, y) in priors.iter() {
            match self.space.from_vector(x) {
                Ok(params) => self.observations.push((params, y)),
                Err(e) => warn!("skipping prior observation: {e}"),
            }
        }
        debug!(priors = self.observations.len(), "bayesian search primed");
        self
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    /// Lowest-loss observation so far.
    pub fn best(&self) -> Option<(&ParameterSet, f64)> {
        self.observations
            .iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, y)| (p, *y))
    }

    /// Pure exploration sample (same as random).
    fn explore(&mut self) -> ParameterSet {
        self.space.sample_one(&mut self.rng)
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&mut self) -> ParameterSet {
        let base = match self.best() {
            Some((params, _)) => params.clone(),
            None => return self.explore(),
        };

        let mut perturbed = ParameterSet::new();
        for def in &self.space.parameters {
            let value = match base.get(&def.name) {
                Some(v) => def.kind.perturb(v, &mut self.rng),
                None => def.kind.sample(&mut self.rng),
            };
            let _ = perturbed.insert(def.name.clone(), value);
        }
        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count)
            .map(|_| {
                let warming_up = self.proposed < self.n_initial_points;
                self.proposed += 1;
                if warming_up
                    || self.observations.is_empty()
                    || self.rng.gen::<f64>() < self.exploration_weight
                {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &ParameterSet, loss: f64) {
        self.observations.push((params.clone(), loss));
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}
