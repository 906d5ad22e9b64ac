/// Model checkpointing with safetensors
///
/// The manager keeps two slots per run: `last-model.pth`, overwritten after
/// every epoch, and `best-model.pth`, overwritten only when the validation
/// loss improves. Both are safetensors files whose header metadata carries
/// the epoch and validation loss.
///
/// The two files are written one after the other without a transaction. A
/// crash in between can leave them describing different epochs.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use safetensors::SafeTensors;

use crate::{MonolabError, Result};

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Epoch after which the snapshot was taken
    pub epoch: usize,
    /// Per-image validation loss of that epoch
    pub val_loss: f64,
}

impl CheckpointMetadata {
    const EPOCH_KEY: &'static str = "epoch";
    const VAL_LOSS_KEY: &'static str = "val_loss";

    fn to_header(&self) -> HashMap<String, String> {
        HashMap::from([
            (Self::EPOCH_KEY.to_string(), self.epoch.to_string()),
            (Self::VAL_LOSS_KEY.to_string(), self.val_loss.to_string()),
        ])
    }

    fn from_header(header: &HashMap<String, String>) -> Result<Self> {
        let field = |key: &str| {
            header.get(key).ok_or_else(|| {
                MonolabError::Checkpoint(format!("missing '{}' in checkpoint metadata", key))
            })
        };

        let epoch = field(Self::EPOCH_KEY)?
            .parse::<usize>()
            .map_err(|e| MonolabError::Checkpoint(format!("invalid epoch: {}", e)))?;
        let val_loss = field(Self::VAL_LOSS_KEY)?
            .parse::<f64>()
            .map_err(|e| MonolabError::Checkpoint(format!("invalid val_loss: {}", e)))?;

        Ok(Self { epoch, val_loss })
    }
}

/// Model checkpoint
pub struct Checkpoint {
    /// Model parameters
    pub tensors: HashMap<String, Tensor>,
    /// Metadata
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create new checkpoint
    pub fn new(tensors: HashMap<String, Tensor>, metadata: CheckpointMetadata) -> Self {
        Self { tensors, metadata }
    }

    /// Save checkpoint to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_checkpoint(&self.tensors, path, &self.metadata)
    }

    /// Load checkpoint from file
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, device)?;
        let metadata = read_metadata(path)?;
        Ok(Self { tensors, metadata })
    }
}

/// Load the tensors and metadata of a checkpoint written by the manager
pub fn load_checkpoint<P: AsRef<Path>>(path: P, device: &Device) -> Result<Checkpoint> {
    Checkpoint::load(path, device)
}

/// Save model parameters to a safetensors checkpoint
pub fn save_checkpoint<P: AsRef<Path>>(
    params: &HashMap<String, Tensor>,
    path: P,
    metadata: &CheckpointMetadata,
) -> Result<()> {
    let path = path.as_ref();
    safetensors::tensor::serialize_to_file(
        params.iter().map(|(name, tensor)| (name.as_str(), tensor)),
        &Some(metadata.to_header()),
        path,
    )
    .map_err(|e| MonolabError::Checkpoint(format!("failed to write {}: {}", path.display(), e)))
}

/// Read the `{epoch, val_loss}` metadata of a checkpoint
///
/// The header is validated by `safetensors` (size limit, offsets) so a
/// truncated or corrupt file is reported as `MonolabError::Checkpoint`.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<CheckpointMetadata> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;

    let (_, header) = SafeTensors::read_metadata(&bytes).map_err(|e| {
        MonolabError::Checkpoint(format!("invalid checkpoint {}: {:?}", path.display(), e))
    })?;
    let metadata = header.metadata().as_ref().ok_or_else(|| {
        MonolabError::Checkpoint(format!("{} has no checkpoint metadata", path.display()))
    })?;
    CheckpointMetadata::from_header(metadata)
}

/// Owner of the `last` and `best` checkpoint slots of a run
pub struct CheckpointManager {
    last_path: PathBuf,
    best_path: PathBuf,
    best_val_loss: f64,
    best_epoch: Option<usize>,
}

impl CheckpointManager {
    pub const LAST_FILE: &'static str = "last-model.pth";
    pub const BEST_FILE: &'static str = "best-model.pth";

    /// Create the checkpoint directory; no best loss is known yet
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        Ok(Self {
            last_path: dir.join(Self::LAST_FILE),
            best_path: dir.join(Self::BEST_FILE),
            best_val_loss: f64::INFINITY,
            best_epoch: None,
        })
    }

    /// Write `last`, and `best` when `val_loss` beats every earlier value
    ///
    /// Returns whether the best slot was updated.
    pub fn update(
        &mut self,
        params: &HashMap<String, Tensor>,
        val_loss: f64,
        epoch: usize,
    ) -> Result<bool> {
        let metadata = CheckpointMetadata { epoch, val_loss };

        save_checkpoint(params, &self.last_path, &metadata)?;

        if val_loss < self.best_val_loss {
            save_checkpoint(params, &self.best_path, &metadata)?;
            self.best_val_loss = val_loss;
            self.best_epoch = Some(epoch);
            log::info!(
                "New best validation loss {:.6} at epoch {}, saved {}",
                val_loss,
                epoch,
                self.best_path.display()
            );
            return Ok(true);
        }

        Ok(false)
    }

    /// Lowest validation loss seen so far, +inf before the first update
    pub fn best_val_loss(&self) -> f64 {
        self.best_val_loss
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn last_path(&self) -> &Path {
        &self.last_path
    }

    pub fn best_path(&self) -> &Path {
        &self.best_path
    }
}
