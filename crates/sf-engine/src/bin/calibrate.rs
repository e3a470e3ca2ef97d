use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sf_engine::{calibrate_targets, init_tracing, CalibrationSettings, SimulationGateway};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Optional settings file; environment variables override it.
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = CalibrationSettings::load(settings_path.as_deref())
        .context("loading calibration settings")?;
    settings.validate()?;

    let gateway = SimulationGateway::new(settings.workers.clone())?
        .with_handshake_timeout(settings.handshake_timeout());
    info!(
        workers = gateway.endpoints().len(),
        targets = settings.targets.len(),
        "starting calibration"
    );

    let summaries = calibrate_targets(&settings, Arc::new(gateway)).await?;
    for summary in &summaries {
        info!(
            target = %summary.target_name,
            best_loss = ?summary.best_loss(),
            results = %summary.results_dir.display(),
            "run complete"
        );
    }
    Ok(())
}
