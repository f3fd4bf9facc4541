use thiserror::Error;

#[derive(Debug, Error)]
pub enum JacobiError {
    #[error("no usable compute device: {0}")]
    DeviceUnavailable(String),

    #[error("kernel program failed to build: {0}")]
    CompileError(String),

    #[error("dimension mismatch: {what} has length {actual}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    #[error("kernel `{kernel}` argument error: {reason}")]
    ArgumentMismatch { kernel: &'static str, reason: String },

    #[error("coordinate {x} outside interpolation range [{min}, {max}]")]
    DomainError { x: f64, min: f64, max: f64 },

    #[error("device error: {0}")]
    Device(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JacobiError>;
