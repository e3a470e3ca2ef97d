// Simulator seam - the opaque physics engine behind a worker

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use sf_types::{Curve, ParameterSet, SimulationFailure};
use tracing::{debug, info, warn};

/// Stress scale for simulators that report pascals.
pub const PA_TO_MPA: f64 = 1e-6;

/// A single, stateful simulation engine.
///
/// Implementations are not reentrant: the worker owns exactly one and runs
/// it for one parameter set at a time. Every run starts from a fresh model.
pub trait Simulator: Send {
    fn name(&self) -> &str;

    fn run(&mut self, params: &ParameterSet) -> Result<Curve, SimulationFailure>;
}

/// Runs an external program per simulation.
///
/// The parameter set is written to the program's stdin as JSON; its stdout
/// is read as a history export (`step strain stress` per line).
#[derive(Debug, Clone)]
pub struct CommandSimulator {
    program: PathBuf,
    args: Vec<String>,
    stress_scale: f64,
}

impl CommandSimulator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stress_scale: PA_TO_MPA,
        }
    }

    /// Build from a full command line, program first.
    pub fn from_command_line(mut command: Vec<String>) -> Option<Self> {
        if command.is_empty() {
            return None;
        }
        let program = command.remove(0);
        Some(Self::new(program, command))
    }

    pub fn with_stress_scale(mut self, stress_scale: f64) -> Self {
        self.stress_scale = stress_scale;
        self
    }
}

impl Simulator for CommandSimulator {
    fn name(&self) -> &str {
        self.program.to_str().unwrap_or("command")
    }

    fn run(&mut self, params: &ParameterSet) -> Result<Curve, SimulationFailure> {
        let input = serde_json::to_vec(params).map_err(|e| SimulationFailure::Internal {
            message: format!("could not encode parameters: {e}"),
        })?;

        info!(program = %self.program.display(), "launching simulator");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SimulationFailure::Launch {
                message: format!("{}: {e}", self.program.display()),
            })?;

        write_input(&mut child, &input)?;

        let output = child
            .wait_with_output()
            .map_err(|e| SimulationFailure::Internal {
                message: format!("could not collect simulator output: {e}"),
            })?;

        if !output.status.success() {
            return Err(SimulationFailure::ExitStatus {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let history = String::from_utf8_lossy(&output.stdout);
        let curve = Curve::from_history_export(&history, self.stress_scale);
        debug!(samples = curve.len(), "history export parsed");
        if curve.is_empty() {
            return Err(SimulationFailure::NoSamples);
        }
        Ok(curve)
    }
}

/// Feed `input` to the child's stdin and close it. On failure the child is
/// killed and reaped before the error is returned.
fn write_input(child: &mut Child, input: &[u8]) -> Result<(), SimulationFailure> {
    let Some(mut stdin) = child.stdin.take() else {
        return Ok(());
    };
    if let Err(e) = stdin.write_all(input) {
        drop(stdin);
        if let Err(kill_err) = child.kill() {
            warn!(error = %kill_err, "could not kill simulator");
        }
        let _ = child.wait();
        return Err(SimulationFailure::Internal {
            message: format!("could not write parameters: {e}"),
        });
    }
    Ok(())
}
