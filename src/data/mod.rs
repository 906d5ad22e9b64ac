/// Data loading modules for stereo training
pub mod stereo_dataset;

pub use stereo_dataset::{StereoBatchLoader, StereoDataset};

use candle_core::{Result, Tensor, Device};

/// One batch of rectified stereo pairs
#[derive(Debug, Clone)]
pub struct StereoBatch {
    /// Left images: [batch, channels, height, width]
    pub left: Tensor,
    /// Right images: [batch, channels, height, width]
    pub right: Tensor,
}

/// Generic stereo data loader
pub trait StereoDataLoader {
    /// Get next batch, `None` once the epoch is exhausted
    fn next_batch(&mut self, device: &Device) -> Result<Option<StereoBatch>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;

    /// Get total number of image pairs
    fn n_img(&self) -> usize;
}
