/// Run configuration for a training session
///
/// Mirrors the flags a monodepth training run is started with. The whole
/// struct is archived into `args.txt` when the run is finalized.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::eval::EvaluatorKind;
use crate::{MonolabError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Root directory of the stereo dataset
    pub data_dir: PathBuf,

    /// File listing training left/right image pairs
    pub filenames_file: PathBuf,

    /// File listing validation left/right image pairs
    pub val_filenames_file: PathBuf,

    /// Parent directory of all run directories
    pub output_dir: PathBuf,

    /// Optional suffix appended to the run directory name
    pub tag: String,

    /// Model identifier, resolved by the caller's model factory
    pub model: String,

    /// Number of input channels of the left image
    pub input_channels: usize,

    pub input_height: usize,
    pub input_width: usize,

    /// Number of training epochs
    pub epochs: usize,

    /// Base learning rate
    pub learning_rate: f64,

    /// Apply the step-decay schedule (halve at epoch 30, quarter at 40)
    pub adjust_lr: bool,

    pub batch_size: usize,
    pub num_workers: usize,
    pub do_augmentation: bool,

    /// Gamma, brightness and color ranges used by the augmentation pipeline
    pub augment_parameters: Vec<f64>,

    /// Device selector: "cpu", "cuda" or "cuda:N"
    pub device: String,

    /// Accuracy evaluator to run after training
    pub eval: Option<EvaluatorKind>,

    /// Recipient of the "training finished" notification
    pub notify: Option<String>,

    /// Text log written during the run, copied into the run directory
    pub log_file: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            filenames_file: PathBuf::from("resources/filenames/kitti_train_files.txt"),
            val_filenames_file: PathBuf::from("resources/filenames/kitti_val_files.txt"),
            output_dir: PathBuf::from("output"),
            tag: String::new(),
            model: "deeplab".to_string(),
            input_channels: 3,
            input_height: 256,
            input_width: 512,
            epochs: 50,
            learning_rate: 1e-4,
            adjust_lr: true,
            batch_size: 8,
            num_workers: 4,
            do_augmentation: true,
            augment_parameters: vec![0.8, 1.2, 0.5, 2.0, 0.8, 1.2],
            device: "cpu".to_string(),
            eval: None,
            notify: None,
            log_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: RunConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(MonolabError::Config("epochs must be > 0".to_string()));
        }

        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(MonolabError::Config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }

        if self.batch_size == 0 {
            return Err(MonolabError::Config("batch_size must be > 0".to_string()));
        }

        if self.augment_parameters.len() != 6 {
            return Err(MonolabError::Config(format!(
                "augment_parameters must hold 6 values, got {}",
                self.augment_parameters.len()
            )));
        }

        // Resolving the selector string is enough, no device is opened here.
        parse_device_selector(&self.device)?;

        Ok(())
    }

    /// Open the configured device
    pub fn device(&self) -> Result<Device> {
        match parse_device_selector(&self.device)? {
            None => Ok(Device::Cpu),
            Some(ordinal) => Ok(Device::new_cuda(ordinal)?),
        }
    }

    /// All fields as `key -> rendered value`, sorted by key
    ///
    /// Unset options render as `None` and flags as `True` / `False`, matching
    /// the args.txt files of earlier runs.
    pub fn to_sorted_pairs(&self) -> Result<BTreeMap<String, String>> {
        let value = serde_json::to_value(self)?;
        let object = value.as_object().ok_or_else(|| {
            MonolabError::Config("run configuration did not serialize to an object".to_string())
        })?;

        Ok(object
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => "None".to_string(),
                    serde_json::Value::Bool(true) => "True".to_string(),
                    serde_json::Value::Bool(false) => "False".to_string(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect())
    }
}

/// `None` for the CPU, `Some(ordinal)` for a CUDA device
fn parse_device_selector(selector: &str) -> Result<Option<usize>> {
    match selector {
        "cpu" => Ok(None),
        "cuda" => Ok(Some(0)),
        other => match other.strip_prefix("cuda:") {
            Some(ordinal) => ordinal.parse::<usize>().map(Some).map_err(|_| {
                MonolabError::Config(format!("Invalid CUDA ordinal in device '{}'", other))
            }),
            None => Err(MonolabError::Config(format!(
                "Invalid device: {}. Must be 'cpu', 'cuda' or 'cuda:N'",
                other
            ))),
        },
    }
}
