use serde::{Deserialize, Serialize};

use crate::errors::CurveError;

/// One (strain, stress) sample. Stress is in MPa.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub strain: f64,
    pub stress: f64,
}

impl CurvePoint {
    pub fn new(strain: f64, stress: f64) -> Self {
        Self { strain, stress }
    }

    /// Euclidean distance in the (strain, stress) plane.
    pub fn distance(&self, other: &CurvePoint) -> f64 {
        (self.strain - other.strain).hypot(self.stress - other.stress)
    }

    pub fn norm(&self) -> f64 {
        self.strain.hypot(self.stress)
    }
}

/// Ordered stress-strain samples, simulated or experimental.
///
/// Strain is not required to be monotonic. An empty curve is a legal value
/// and means the simulation produced nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "CurveColumns", into = "CurveColumns")]
pub struct Curve {
    points: Vec<CurvePoint>,
}

impl Curve {
    pub fn new(points: Vec<CurvePoint>) -> Self {
        Self { points }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from parallel strain/stress columns of equal length.
    pub fn from_columns(strain: Vec<f64>, stress: Vec<f64>) -> Result<Self, CurveError> {
        if strain.len() != stress.len() {
            return Err(CurveError::LengthMismatch {
                strain: strain.len(),
                stress: stress.len(),
            });
        }
        let points: Vec<CurvePoint> = strain
            .into_iter()
            .zip(stress)
            .map(|(e, s)| CurvePoint::new(e, s))
            .collect();
        if let Some(index) = points
            .iter()
            .position(|p| !p.strain.is_finite() || !p.stress.is_finite())
        {
            return Err(CurveError::NonFinite { index });
        }
        Ok(Self { points })
    }

    /// Parse a simulator history export: whitespace-separated lines of
    /// `step strain stress ...`. Header and non-numeric lines are skipped.
    /// Strain and stress become absolute values and stress is multiplied by
    /// `stress_scale` (1e-6 converts Pa to MPa).
    pub fn from_history_export(text: &str, stress_scale: f64) -> Self {
        let points = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let _step: f64 = fields.next()?.parse().ok()?;
                let strain: f64 = fields.next()?.parse().ok()?;
                let stress: f64 = fields.next()?.parse().ok()?;
                if !strain.is_finite() || !stress.is_finite() {
                    return None;
                }
                Some(CurvePoint::new(strain.abs(), stress.abs() * stress_scale))
            })
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn strains(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.strain).collect()
    }

    pub fn stresses(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.stress).collect()
    }

    /// Sample with the largest stress; the first one wins on ties.
    pub fn peak_point(&self) -> Option<CurvePoint> {
        self.points.iter().copied().reduce(|best, p| {
            if p.stress > best.stress {
                p
            } else {
                best
            }
        })
    }

    pub fn max_strain(&self) -> Option<f64> {
        self.points.iter().map(|p| p.strain).reduce(f64::max)
    }
}

/// Columnar interchange form: `{"Strain": [...], "Stress": [...]}`.
///
/// This is both the worker's result payload and the shape the curve takes
/// when serialized anywhere else.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurveColumns {
    #[serde(rename = "Strain")]
    pub strain: Vec<f64>,
    #[serde(rename = "Stress")]
    pub stress: Vec<f64>,
}

impl TryFrom<CurveColumns> for Curve {
    type Error = CurveError;

    fn try_from(columns: CurveColumns) -> Result<Self, Self::Error> {
        Curve::from_columns(columns.strain, columns.stress)
    }
}

impl From<Curve> for CurveColumns {
    fn from(curve: Curve) -> Self {
        let strain = curve.strains();
        let stress = curve.stresses();
        Self { strain, stress }
    }
}
