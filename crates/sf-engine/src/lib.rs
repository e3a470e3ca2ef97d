// StrainFit calibration engine
// Worker protocol, simulation gateway/worker and the calibration loop

pub mod calibration;
pub mod config;
pub mod gateway;
pub mod objective;
pub mod protocol;
pub mod simulator;
pub mod worker;

pub use calibration::{calibrate_targets, CalibrationRun, RunSummary};
pub use config::CalibrationSettings;
pub use gateway::{GatewayError, SimulationBackend, SimulationGateway, WorkerEndpoint};
pub use objective::{Evaluation, ObjectiveEvaluator, RunContext, MIN_CURVE_SAMPLES};
pub use simulator::{CommandSimulator, Simulator};
pub use worker::SimulationWorker;

use tracing_subscriber::EnvFilter;

/// Install the `RUST_LOG`-driven subscriber used by both binaries.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
