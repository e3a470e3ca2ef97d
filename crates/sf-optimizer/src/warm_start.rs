//! Priming the optimizer with everything the knowledge base already knows.
//!
//! Cached curves are rescored against the *current* target with the
//! *current* loss, so priors stay meaningful when either changes between runs.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sf_data::KnowledgeStore;
use sf_types::{CalResult, Curve};
use tracing::{info, warn};

use crate::loss::{LossFunction, LossOutcome};
use crate::search::SearchSpace;

/// Prior observations as parallel lists: `x0[i]` is a parameter vector in
/// search-space order and `y0[i]` its loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmStart {
    pub x0: Vec<Vec<f64>>,
    pub y0: Vec<f64>,
}

impl WarmStart {
    pub fn len(&self) -> usize {
        self.y0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[f64], f64)> {
        self.x0.iter().map(Vec::as_slice).zip(self.y0.iter().copied())
    }
}

/// Builds [`WarmStart`] priors from a [`KnowledgeStore`].
#[derive(Debug, Clone)]
pub struct WarmStartBuilder {
    space: SearchSpace,
    loss: Arc<dyn LossFunction>,
}

impl WarmStartBuilder {
    pub fn new(space: SearchSpace, loss: Arc<dyn LossFunction>) -> Self {
        Self { space, loss }
    }

    /// Rescore every cached entry against `target`.
    ///
    /// An empty store yields an empty [`WarmStart`]. Entries whose parameters
    /// do not fit the current search space are skipped. Failed scores,
    /// including curves too short to trust, are kept as the penalty value so
    /// the optimizer still learns that region is bad.
    pub fn build(&self, store: &KnowledgeStore, target: &Curve) -> CalResult<WarmStart> {
        let entries = store.list_all()?;
        if entries.is_empty() {
            info!("No prior knowledge found. Starting with random exploration.");
            return Ok(WarmStart::default());
        }

        let total = entries.len();
        let candidates: Vec<_> = entries
            .into_iter()
            .filter_map(|entry| {
                if !self.space.contains(&entry.parameters) {
                    warn!(
                        fingerprint = %entry.fingerprint.short(),
                        "prior point outside the current search space, skipping"
                    );
                    return None;
                }
                let x = self.space.to_vector(&entry.parameters)?;
                Some((x, entry.curve))
            })
            .collect();

        let scored: Vec<(Vec<f64>, f64)> = candidates
            .into_par_iter()
            .map(|(x, curve)| {
                let outcome = LossOutcome::short_curve(&curve)
                    .unwrap_or_else(|| self.loss.evaluate(target, &curve));
                let y = outcome.value();
                (x, y)
            })
            .collect();

        let (x0, y0): (Vec<_>, Vec<_>) = scored.into_iter().unzip();
        info!(
            loaded = y0.len(),
            skipped = total - y0.len(),
            loss = self.loss.name(),
            "warm start built from knowledge base"
        );
        Ok(WarmStart { x0, y0 })
    }
}
