//! Curve comparison losses.
//!
//! Two interchangeable scorers sit behind [`LossFunction`]: the full
//! dynamic-time-warping alignment ([`DtwLoss`]) and the fast peak/extent
//! heuristic ([`KeypointLoss`]). Both report a typed [`LossOutcome`] so that a
//! failed evaluation can never be mistaken for a large but genuine loss.

use serde::{Deserialize, Serialize};
use sf_types::Curve;
use std::fmt;
use std::sync::Arc;

/// Score handed to the optimizer for a failed evaluation.
pub const PENALTY_LOSS: f64 = 1e10;

/// Guards the key-point ratios against a zero denominator.
pub const KEYPOINT_EPSILON: f64 = 1e-9;

/// Curves shorter than this are treated as failed simulations.
pub const MIN_CURVE_SAMPLES: usize = 5;

/// Result of scoring one simulated curve against the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LossOutcome {
    /// A finite, non-negative loss.
    Scored(f64),
    /// The curve could not be scored (empty, degenerate, simulation failed).
    Failed { reason: String },
}

impl LossOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Numeric value for the optimizer; failures map to [`PENALTY_LOSS`].
    pub fn value(&self) -> f64 {
        match self {
            Self::Scored(v) => *v,
            Self::Failed { .. } => PENALTY_LOSS,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The failure a curve under [`MIN_CURVE_SAMPLES`] scores as, if it is one.
    pub fn short_curve(curve: &Curve) -> Option<Self> {
        (curve.len() < MIN_CURVE_SAMPLES).then(|| {
            Self::failed(format!(
                "curve has {} samples, need at least {MIN_CURVE_SAMPLES}",
                curve.len()
            ))
        })
    }
}

impl fmt::Display for LossOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scored(v) => write!(f, "{v:.4}"),
            Self::Failed { reason } => write!(f, "penalty {PENALTY_LOSS:e} ({reason})"),
        }
    }
}

/// Scores a simulated curve against the target curve.
pub trait LossFunction: Send + Sync + fmt::Debug {
    fn evaluate(&self, target: &Curve, simulated: &Curve) -> LossOutcome;

    /// Human-readable loss name.
    fn name(&self) -> &str;
}

/// Minimal cumulative Euclidean alignment cost between two curves.
///
/// Standard DTW recurrence over the (strain, stress) plane:
/// `cost[i][j] = d(a[i], b[j]) + min(cost[i-1][j], cost[i][j-1], cost[i-1][j-1])`.
/// Only the previous row is ever read, so two rows of length `b.len()` are
/// kept instead of the full matrix. Returns `f64::INFINITY` if either curve
/// is empty.
pub fn dtw_distance(a: &Curve, b: &Curve) -> f64 {
    let (s1, s2) = (a.points(), b.points());
    let (m, n) = (s1.len(), s2.len());
    if m == 0 || n == 0 {
        return f64::INFINITY;
    }

    let mut prev = vec![0.0; n];
    let mut curr = vec![0.0; n];

    prev[0] = s1[0].distance(&s2[0]);
    for j in 1..n {
        prev[j] = prev[j - 1] + s1[0].distance(&s2[j]);
    }

    for p in &s1[1..] {
        curr[0] = prev[0] + p.distance(&s2[0]);
        for j in 1..n {
            let best = prev[j].min(curr[j - 1]).min(prev[j - 1]);
            curr[j] = p.distance(&s2[j]) + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n - 1]
}

/// DTW alignment cost as a loss.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DtwLoss;

impl LossFunction for DtwLoss {
    fn evaluate(&self, target: &Curve, simulated: &Curve) -> LossOutcome {
        let distance = dtw_distance(target, simulated);
        if distance.is_finite() {
            LossOutcome::Scored(distance)
        } else {
            LossOutcome::failed("cannot align an empty curve")
        }
    }

    fn name(&self) -> &str {
        "dtw"
    }
}

/// Fast heuristic comparing only the peak-stress point and the maximum
/// strain of each curve, both as relative errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeypointLoss {
    pub w_peak_point: f64,
    pub w_max_strain: f64,
}

impl Default for KeypointLoss {
    fn default() -> Self {
        Self {
            w_peak_point: 1.0,
            w_max_strain: 1.0,
        }
    }
}

impl KeypointLoss {
    pub fn new(w_peak_point: f64, w_max_strain: f64) -> Self {
        Self {
            w_peak_point,
            w_max_strain,
        }
    }
}

impl LossFunction for KeypointLoss {
    fn evaluate(&self, target: &Curve, simulated: &Curve) -> LossOutcome {
        let keypoints = |c: &Curve| Some((c.peak_point()?, c.max_strain()?));

        let Some((peak_target, strain_target)) = keypoints(target) else {
            return LossOutcome::failed("target curve is empty");
        };
        let Some((peak_sim, strain_sim)) = keypoints(simulated) else {
            return LossOutcome::failed("simulated curve is empty");
        };

        let peak_error = peak_target.distance(&peak_sim) / (peak_target.norm() + KEYPOINT_EPSILON);
        let strain_error =
            (strain_target - strain_sim).abs() / (strain_target + KEYPOINT_EPSILON);

        let loss = self.w_peak_point * peak_error + self.w_max_strain * strain_error;
        if loss.is_finite() {
            LossOutcome::Scored(loss)
        } else {
            LossOutcome::failed("key-point loss is not finite")
        }
    }

    fn name(&self) -> &str {
        "keypoint"
    }
}

/// Run-level loss selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossKind {
    Dtw,
    Keypoint {
        #[serde(default = "unit_weight")]
        w_peak_point: f64,
        #[serde(default = "unit_weight")]
        w_max_strain: f64,
    },
}

fn unit_weight() -> f64 {
    1.0
}

impl Default for LossKind {
    fn default() -> Self {
        Self::Dtw
    }
}

impl LossKind {
    pub fn build(&self) -> Arc<dyn LossFunction> {
        match self {
            Self::Dtw => Arc::new(DtwLoss),
            Self::Keypoint {
                w_peak_point,
                w_max_strain,
            } => Arc::new(KeypointLoss::new(*w_peak_point, *w_max_strain)),
        }
    }
}
