use thiserror::Error;

/// Main error type for the StrainFit system
#[derive(Error, Debug)]
pub enum CalError {
    #[error("Curve error: {0}")]
    Curve(#[from] CurveError),

    #[error("Knowledge base error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationFailure),

    /// No configured worker accepted the request. Fatal to the current run.
    #[error("All {attempted} simulation workers unreachable (last error: {last_error})")]
    WorkersUnreachable { attempted: usize, last_error: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CalError {
    /// Whether this error must abort the whole optimization run rather than
    /// being scored as a bad parameter set.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CalError::WorkersUnreachable { .. })
    }
}

/// Curve construction and parsing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurveError {
    #[error("Strain and stress columns differ in length: {strain} vs {stress}")]
    LengthMismatch { strain: usize, stress: usize },

    #[error("Non-finite sample at index {index}")]
    NonFinite { index: usize },

    #[error("Curve has no usable samples: {message}")]
    Empty { message: String },

    #[error("Missing column '{column}' in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("Curve parsing error: {message}")]
    ParseError { message: String },
}

/// Knowledge base errors
#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Corrupt knowledge record {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Fingerprint {fingerprint} holds different parameters than requested")]
    FingerprintMismatch { fingerprint: String },

    #[error("Knowledge base directory unavailable: {path}: {message}")]
    Unavailable { path: String, message: String },
}

/// Raised by a simulator when a run produced no usable curve.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationFailure {
    #[error("simulator could not be started: {message}")]
    Launch { message: String },

    #[error("simulator exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("simulator produced no samples")]
    NoSamples,

    #[error("simulation error: {message}")]
    Internal { message: String },
}

/// Result type alias for StrainFit operations
pub type CalResult<T> = Result<T, CalError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::CalError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CalError::Config(format!($($arg)*))
    };
}
