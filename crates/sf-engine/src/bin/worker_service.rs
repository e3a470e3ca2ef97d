use anyhow::Context;
use sf_engine::{init_tracing, CommandSimulator, SimulationWorker};

const DEFAULT_WORKER_ADDR: &str = "127.0.0.1:50002";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let addr =
        std::env::var("STRAINFIT_WORKER_ADDR").unwrap_or_else(|_| DEFAULT_WORKER_ADDR.to_string());

    let command: Vec<String> = std::env::args().skip(1).collect();
    let simulator = CommandSimulator::from_command_line(command)
        .context("usage: strainfit-worker <simulator-program> [args...]")?;

    let worker = SimulationWorker::bind(&addr, Box::new(simulator))
        .await
        .with_context(|| format!("binding worker to {addr}"))?;
    worker.serve().await?;
    Ok(())
}
