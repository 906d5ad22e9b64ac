/// Experiment tracking: metric history, telemetry, plots and run artifacts
pub mod colorize;
pub mod metrics;
pub mod plots;
pub mod reporter;
pub mod telemetry;

pub use colorize::{colorize, Palette};
pub use metrics::{MetricSeries, MetricStore};
pub use plots::{PlotRenderer, PngPlotter};
pub use reporter::{ExperimentReporter, MetricReport, RunLayout};
pub use telemetry::{TelemetrySink, TensorBoardWriter};
