//! Back-test runner.
//!
//! Loads a TOML run description and a JSON-lines history file, replays the
//! history through `HistoryEmulationConnector`, submits the scripted orders
//! as the replay clock reaches them and reports the resulting positions.

pub mod app;
pub mod config;
pub mod error;
pub mod history;

pub use app::{Application, RunReport};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
