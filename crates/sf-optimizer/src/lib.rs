//! # sf-optimizer
//!
//! Curve losses, search spaces and sequential search strategies for
//! StrainFit.
//!
//! Provides the DTW and key-point losses, parameter space definitions,
//! random and surrogate-guided search, warm-start priors rebuilt from the
//! knowledge base, and trial tracking.

mod loss;
mod search;
mod trial;
mod warm_start;

pub use loss::{
    dtw_distance, DtwLoss, KeypointLoss, LossFunction, LossKind, LossOutcome, KEYPOINT_EPSILON,
    MIN_CURVE_SAMPLES, PENALTY_LOSS,
};
pub use search::{
    BayesianSearch, ParameterDef, ParameterKind, RandomSearch, SearchSpace, SearchStrategy,
};
pub use trial::{
    OptimizationConfig, OptimizationId, OptimizationState, OptimizationStatus, Trial,
    TrialResult, TrialStatus,
};
pub use warm_start::{WarmStart, WarmStartBuilder};
