use std::path::Path;

use csv::ReaderBuilder;
use sf_types::{CalResult, Curve, CurveError, CurvePoint};

const STRAIN_COLUMN: &str = "Strain";
/// Stress already expressed in MPa.
const STRESS_COLUMN: &str = "Stress";
/// Stress in Pa, converted to MPa on load.
const STRESS_PA_COLUMN: &str = "Stress(Pa)";

const PA_TO_MPA: f64 = 1e-6;

/// Load the experimental target curve from a CSV file with a header row.
///
/// Requires a `Strain` column and either `Stress(Pa)` or `Stress` (MPa).
/// Both columns are stored as magnitudes, so compression-negative exports
/// load the same as positive ones. Rows that fail to parse are skipped with a warning; a file with no usable
/// rows is an error.
pub fn load_target_curve<P: AsRef<Path>>(path: P) -> CalResult<Curve> {
    let path = path.as_ref();
    tracing::info!("Loading target curve from: {}", path.display());

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CurveError::ParseError {
            message: format!("Failed to open target file {}: {}", path.display(), e),
        })?;

    let headers = rdr
        .headers()
        .map_err(|e| CurveError::ParseError {
            message: format!("Failed to read CSV headers: {}", e),
        })?
        .clone();
    tracing::debug!("CSV headers: {:?}", headers);

    let source_name = path.display().to_string();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let strain_idx = column(STRAIN_COLUMN).ok_or_else(|| CurveError::MissingColumn {
        column: STRAIN_COLUMN.to_string(),
        source_name: source_name.clone(),
    })?;
    let (stress_idx, stress_scale) = match (column(STRESS_PA_COLUMN), column(STRESS_COLUMN)) {
        (Some(idx), _) => (idx, PA_TO_MPA),
        (None, Some(idx)) => (idx, 1.0),
        (None, None) => {
            return Err(CurveError::MissingColumn {
                column: format!("{STRESS_PA_COLUMN} or {STRESS_COLUMN}"),
                source_name,
            }
            .into())
        }
    };

    let mut points = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping unreadable record at line {}: {}", line_num + 2, e);
                continue;
            }
        };

        let parse = |idx: usize| -> Option<f64> {
            record
                .get(idx)
                .and_then(|field| field.parse::<f64>().ok())
                .filter(|v| v.is_finite())
        };

        match (parse(strain_idx), parse(stress_idx)) {
            (Some(strain), Some(stress)) => {
                points.push(CurvePoint::new(strain.abs(), (stress * stress_scale).abs()));
            }
            _ => {
                tracing::warn!("Skipping invalid record at line {}: {:?}", line_num + 2, record);
            }
        }
    }

    if points.is_empty() {
        return Err(CurveError::Empty {
            message: format!("target file {} contains no numeric rows", source_name),
        }
        .into());
    }

    tracing::info!("Loaded target curve with {} samples from {}", points.len(), path.display());
    Ok(Curve::new(points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_types::CalError;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn converts_pascal_stress_to_mpa() {
        let file = write_csv("Strain,Stress(Pa)\n0.0,0.0\n0.001,2500000\n0.002,5000000\n");
        let curve = load_target_curve(file.path()).unwrap();
        assert_eq!(curve.len(), 3);
        assert!((curve.points()[2].stress - 5.0).abs() < 1e-12);
    }

    #[test]
    fn keeps_mpa_stress_column_as_is() {
        let file = write_csv("Stress,Strain\n0.0,0.0\n12.5,0.001\n");
        let curve = load_target_curve(file.path()).unwrap();
        assert_eq!(curve.points()[1], CurvePoint::new(0.001, 12.5));
    }

    #[test]
    fn compression_negative_target_loads_as_magnitudes() {
        let file = write_csv(
            "Strain,Stress(Pa)\n0.0,0.0\n-0.001,-2000000\n-0.002,-4500000\n-0.003,-3000000\n",
        );
        let curve = load_target_curve(file.path()).unwrap();
        assert_eq!(curve.points()[1], CurvePoint::new(0.001, 2.0));

        let peak = curve.peak_point().unwrap();
        assert_eq!(peak.strain, 0.002);
        assert!((peak.stress - 4.5).abs() < 1e-12);
        assert_eq!(curve.max_strain(), Some(0.003));
    }

    #[test]
    fn skips_unparsable_rows() {
        let file = write_csv("Strain,Stress\n0.0,0.0\nabc,1.0\n0.002,4.0\n");
        let curve = load_target_curve(file.path()).unwrap();
        assert_eq!(curve.len(), 2);
    }

    #[test]
    fn missing_stress_column_is_an_error() {
        let file = write_csv("Strain,Load\n0.0,1.0\n");
        let err = load_target_curve(file.path()).unwrap_err();
        assert!(matches!(
            err,
            CalError::Curve(CurveError::MissingColumn { .. })
        ));
    }

    #[test]
    fn missing_file_and_empty_file_are_errors() {
        assert!(load_target_curve("/definitely/not/here.csv").is_err());

        let file = write_csv("Strain,Stress\n");
        let err = load_target_curve(file.path()).unwrap_err();
        assert!(matches!(err, CalError::Curve(CurveError::Empty { .. })));
    }
}
