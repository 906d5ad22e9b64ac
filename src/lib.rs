//! monolab - training harness for stereo disparity estimation
//!
//! Drives the epoch loop of a self-supervised stereo depth model, tracks
//! per-epoch losses, keeps `last`/`best` checkpoints and exports plots, logs
//! and metric dumps into a per-run directory.
//!
//! # Components
//!
//! - **Trainer**: the epoch loop (lr schedule, train pass, validation pass,
//!   per-image aggregation)
//! - **ExperimentReporter**: metric store, checkpoints, telemetry, plots
//! - **CheckpointManager**: `last-model` / `best-model` safetensors snapshots
//! - **EvaluatorRegistry**: dispatch to accuracy evaluators by kind
//!
//! # Example
//!
//! ```ignore
//! use monolab::{RunConfig, ExperimentReporter, training::{schedule_for, Trainer, LOSS_NAMES}};
//!
//! let config = RunConfig::from_json_file("run.json")?;
//! let mut reporter = ExperimentReporter::new(&config, &LOSS_NAMES)?;
//! let schedule = schedule_for(config.adjust_lr);
//! let mut trainer = Trainer::new(&config, model, loss, optimizer, schedule, train, val, config.device()?)?;
//! let summary = trainer.train(&mut reporter, None)?;
//! ```

pub mod config;
pub mod data;
pub mod eval;
pub mod logging;
pub mod models;
pub mod notify;
pub mod tracking;
pub mod training;

// Re-export commonly used items
pub use config::RunConfig;
pub use tracking::ExperimentReporter;
pub use training::{Trainer, TrainingSummary};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum MonolabError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonolabError>;
