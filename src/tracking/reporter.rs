/// Per-run home of every training artifact
///
/// Layout of a run directory:
///
/// ```text
/// <output_dir>/run_<timestamp>[_<tag>]/
///   args.txt              sorted key = value dump of the run configuration
///   log.txt               copy of the run log
///   metric-results.json   metric history
///   checkpoints/          last-model.pth, best-model.pth
///   plots/                losses.png, epoch-metric-train.png, epoch-metric-val.png
///   tensorboard/          live telemetry (TensorBoard event files)
/// ```
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::colorize::{colorize, Palette};
use super::metrics::{MetricSeries, MetricStore};
use super::plots::{PlotRenderer, PngPlotter};
use super::telemetry::{TelemetrySink, TensorBoardWriter};
use crate::training::checkpoint::CheckpointManager;
use crate::{Result, RunConfig};

/// Paths of one run directory
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub base_dir: PathBuf,
    pub args_path: PathBuf,
    pub log_path: PathBuf,
    pub metrics_path: PathBuf,
    pub tensorboard_dir: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub plots_dir: PathBuf,
}

impl RunLayout {
    pub const TIMESTAMP_FORMAT: &'static str = "%y-%b-%d_%Hh:%Mm";

    /// `<output_dir>/run_<timestamp>[_<tag>]`
    pub fn new<P: AsRef<Path>>(output_dir: P, started: DateTime<Local>, tag: &str) -> Self {
        let suffix = if tag.is_empty() {
            String::new()
        } else {
            format!("_{}", tag)
        };
        let name = format!("run_{}{}", started.format(Self::TIMESTAMP_FORMAT), suffix);
        Self::at(output_dir.as_ref().join(name))
    }

    /// Layout rooted at an explicit directory
    pub fn at<P: AsRef<Path>>(base_dir: P) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        Self {
            args_path: base_dir.join("args.txt"),
            log_path: base_dir.join("log.txt"),
            metrics_path: base_dir.join("metric-results.json"),
            tensorboard_dir: base_dir.join("tensorboard"),
            checkpoints_dir: base_dir.join("checkpoints"),
            plots_dir: base_dir.join("plots"),
            base_dir,
        }
    }

    fn create_dirs(&self) -> Result<()> {
        for dir in [&self.tensorboard_dir, &self.checkpoints_dir, &self.plots_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Content of `metric-results.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricReport {
    pub run: String,
    pub max_epochs: usize,
    pub best_val_loss: Option<f64>,
    pub best_epoch: Option<usize>,
    pub metrics: Vec<MetricSeries>,
}

impl MetricReport {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Records metrics, samples and checkpoints of one run and writes the final
/// artifacts
pub struct ExperimentReporter {
    layout: RunLayout,
    metrics: MetricStore,
    checkpoints: CheckpointManager,
    telemetry: Box<dyn TelemetrySink>,
    plotter: Box<dyn PlotRenderer>,
    args: BTreeMap<String, String>,
    log_file: Option<PathBuf>,
    max_epochs: usize,
}

impl ExperimentReporter {
    /// Create the run directory under `config.output_dir`, stamped with the
    /// current local time
    pub fn new<S: AsRef<str>>(config: &RunConfig, metric_names: &[S]) -> Result<Self> {
        let layout = RunLayout::new(&config.output_dir, Local::now(), &config.tag);
        let telemetry = TensorBoardWriter::new(&layout.tensorboard_dir)?;
        Self::with_parts(
            config,
            metric_names,
            layout,
            Box::new(telemetry),
            Box::new(PngPlotter::default()),
        )
    }

    /// Create with an explicit layout, telemetry sink and plot renderer
    pub fn with_parts<S: AsRef<str>>(
        config: &RunConfig,
        metric_names: &[S],
        layout: RunLayout,
        telemetry: Box<dyn TelemetrySink>,
        plotter: Box<dyn PlotRenderer>,
    ) -> Result<Self> {
        let metrics = MetricStore::new(metric_names)?;
        layout.create_dirs()?;
        let checkpoints = CheckpointManager::new(&layout.checkpoints_dir)?;

        log::info!("Run directory: {}", layout.base_dir.display());

        Ok(Self {
            layout,
            metrics,
            checkpoints,
            telemetry,
            plotter,
            args: config.to_sorted_pairs()?,
            log_file: config.log_file.clone(),
            max_epochs: config.epochs,
        })
    }

    /// Record the train and validation value of one metric for an epoch
    ///
    /// The store and the log are updated; the telemetry sink is best effort.
    pub fn record_epoch_metric(
        &mut self,
        epoch: usize,
        train_value: f64,
        val_value: f64,
        metric_name: &str,
    ) -> Result<()> {
        self.metrics.record(metric_name, epoch, train_value, val_value)?;

        if let Err(e) = self.telemetry.add_scalars(
            metric_name,
            &[("train", train_value), ("val", val_value)],
            epoch,
        ) {
            log::warn!("Telemetry: failed to forward {} for epoch {}: {}", metric_name, epoch, e);
        }

        log::info!(
            "{:<10}{:<10} ({:<width$}): Train = {:10.6}, Validation = {:10.6}",
            format!("[{}/{}]", epoch, self.max_epochs),
            "Epoch",
            metric_name,
            train_value,
            val_value,
            width = self.metrics.max_name_len()
        );

        Ok(())
    }

    /// Forward an image sample (channels, height, width) under `image/<tag>`
    pub fn record_image(&mut self, epoch: usize, image: &Tensor, tag: &str) {
        let tag = format!("image/{}", tag);
        if let Err(e) = self.telemetry.add_image(&tag, image, epoch) {
            log::warn!("Telemetry: failed to forward {} for epoch {}: {}", tag, epoch, e);
        }
    }

    /// Colorize a disparity map in [0, 1] with the plasma palette and forward it
    pub fn record_disparity_map(&mut self, epoch: usize, disparity: &Tensor, tag: &str) -> Result<()> {
        let rgb = colorize(disparity, Some(0.0), Some(1.0), Palette::Plasma)?;
        self.record_image(epoch, &rgb, tag);
        Ok(())
    }

    /// Save `last` and possibly `best` checkpoints of the given parameters
    pub fn add_checkpoint(
        &mut self,
        params: &HashMap<String, Tensor>,
        val_loss: f64,
        epoch: usize,
    ) -> Result<bool> {
        self.checkpoints.update(params, val_loss, epoch)
    }

    /// Lowest validation loss passed to `add_checkpoint`
    pub fn best_val_loss(&self) -> f64 {
        self.checkpoints.best_val_loss()
    }

    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Write the final artifacts: log copy, args, metric dump and plots
    ///
    /// Telemetry and plot failures are logged and skipped.
    pub fn finalize(&mut self) -> Result<()> {
        match &self.log_file {
            Some(log_file) => {
                fs::copy(log_file, &self.layout.log_path)?;
            }
            None => log::warn!("No log file configured, skipping log.txt"),
        }

        self.save_args()?;
        self.export_metrics()?;

        if let Err(e) = self.telemetry.flush() {
            log::warn!("Telemetry: flush failed: {}", e);
        }

        self.plot_metric_epochs();
        self.plot_loss_grid();

        log::info!("Run artifacts written to {}", self.layout.base_dir.display());
        Ok(())
    }

    fn save_args(&self) -> Result<()> {
        let width = self.args.keys().map(|k| k.len()).max().unwrap_or(0);
        let lines: Vec<String> = self
            .args
            .iter()
            .map(|(key, value)| format!("{:<width$} = {}", key, value, width = width))
            .collect();

        let content = format!("Command line arguments: \n{}", lines.join("\n"));
        fs::write(&self.layout.args_path, content)?;
        Ok(())
    }

    fn export_metrics(&self) -> Result<()> {
        let run = self
            .layout
            .base_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let report = MetricReport {
            run,
            max_epochs: self.max_epochs,
            best_val_loss: self.checkpoints.best_epoch().map(|_| self.checkpoints.best_val_loss()),
            best_epoch: self.checkpoints.best_epoch(),
            metrics: self.metrics.series().to_vec(),
        };

        let file = fs::File::create(&self.layout.metrics_path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
        Ok(())
    }

    fn plot_metric_epochs(&mut self) {
        let train: Vec<(&str, &[(usize, f64)])> = self
            .metrics
            .series()
            .iter()
            .map(|s| (s.name.as_str(), s.train.as_slice()))
            .collect();
        let val: Vec<(&str, &[(usize, f64)])> = self
            .metrics
            .series()
            .iter()
            .map(|s| (s.name.as_str(), s.val.as_slice()))
            .collect();

        let figures = [
            ("epoch-metric-train.png", "Epochs: Train metric", train),
            ("epoch-metric-val.png", "Epochs: Validation metric", val),
        ];
        for (file, title, curves) in figures {
            let path = self.layout.plots_dir.join(file);
            if let Err(e) = self.plotter.render_curves(&path, title, "Epoch", &curves) {
                log::warn!("Skipping plot {}: {}", file, e);
            }
        }
    }

    fn plot_loss_grid(&mut self) {
        if self.metrics.len() != 4 {
            log::warn!(
                "Number of metrics != 4 (was {}), skipping 2x2 plot.",
                self.metrics.len()
            );
            return;
        }

        let path = self.layout.plots_dir.join("losses.png");
        if let Err(e) = self
            .plotter
            .render_grid(&path, self.metrics.series(), self.max_epochs)
        {
            log::warn!("Skipping plot losses.png: {}", e);
        }
    }
}
