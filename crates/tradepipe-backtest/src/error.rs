//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("History file {path} line {line}: {message}")]
    History {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Emulation error: {0}")]
    Emulation(#[from] tradepipe_emulation::EmulationError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tradepipe_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

pub type AppResult<T> = Result<T, AppError>;
