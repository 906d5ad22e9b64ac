/// Stereo pair dataset held in memory, loadable from NumPy .npy files
use candle_core::{Result, Tensor, Device};
use ndarray::{Array4, ArrayView3, Axis};
use ndarray_npy::ReadNpyExt;
use std::fs::File;
use std::path::Path;

/// Left/right image pairs, both [N, channels, height, width] in [0, 1]
pub struct StereoDataset {
    left: Array4<f32>,
    right: Array4<f32>,
}

impl StereoDataset {
    /// Build from already decoded arrays
    pub fn from_arrays(left: Array4<f32>, right: Array4<f32>) -> crate::Result<Self> {
        if left.shape() != right.shape() {
            return Err(crate::MonolabError::Config(format!(
                "Shape mismatch: left {:?} != right {:?}",
                left.shape(),
                right.shape()
            )));
        }

        Ok(Self { left, right })
    }

    /// Load from directory containing left_images.npy and right_images.npy
    pub fn from_directory<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading stereo dataset from: {:?}", dir);

        let left = read_images(&dir.join("left_images.npy"))?;
        let right = read_images(&dir.join("right_images.npy"))?;

        let dataset = Self::from_arrays(left, right)?;

        log::info!(
            "Dataset loaded: {} pairs, {}x{} pixels, {} channels",
            dataset.len(),
            dataset.height(),
            dataset.width(),
            dataset.channels()
        );

        Ok(dataset)
    }

    /// Get number of image pairs
    pub fn len(&self) -> usize {
        self.left.len_of(Axis(0))
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channels(&self) -> usize {
        self.left.len_of(Axis(1))
    }

    pub fn height(&self) -> usize {
        self.left.len_of(Axis(2))
    }

    pub fn width(&self) -> usize {
        self.left.len_of(Axis(3))
    }

    /// Get left image at index
    pub fn get_left(&self, idx: usize) -> ArrayView3<f32> {
        self.left.index_axis(Axis(0), idx)
    }

    /// Get right image at index
    pub fn get_right(&self, idx: usize) -> ArrayView3<f32> {
        self.right.index_axis(Axis(0), idx)
    }
}

fn read_images(path: &Path) -> crate::Result<Array4<f32>> {
    <Array4<f32> as ReadNpyExt>::read_npy(File::open(path)?).map_err(|e| {
        crate::MonolabError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })
}

/// Batching loader over a `StereoDataset`
pub struct StereoBatchLoader {
    dataset: StereoDataset,
    batch_size: usize,
    current_idx: usize,
    indices: Vec<usize>,
    shuffle: bool,
}

impl StereoBatchLoader {
    /// Create new data loader
    pub fn new(dataset: StereoDataset, batch_size: usize, shuffle: bool) -> Self {
        let num_samples = dataset.len();
        let mut indices: Vec<usize> = (0..num_samples).collect();

        if shuffle {
            use rand::seq::SliceRandom;
            let mut rng = rand::thread_rng();
            indices.shuffle(&mut rng);
        }

        Self {
            dataset,
            batch_size: batch_size.max(1),
            current_idx: 0,
            indices,
            shuffle,
        }
    }

    /// Get dataset reference
    pub fn dataset(&self) -> &StereoDataset {
        &self.dataset
    }
}

impl super::StereoDataLoader for StereoBatchLoader {
    fn next_batch(&mut self, device: &Device) -> Result<Option<super::StereoBatch>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current_idx..end_idx];
        let actual_batch_size = batch_indices.len();

        let mut left_data = Vec::new();
        let mut right_data = Vec::new();

        for &idx in batch_indices {
            left_data.extend(self.dataset.get_left(idx).iter().copied());
            right_data.extend(self.dataset.get_right(idx).iter().copied());
        }

        self.current_idx = end_idx;

        let shape = (
            actual_batch_size,
            self.dataset.channels(),
            self.dataset.height(),
            self.dataset.width(),
        );
        let left = Tensor::from_vec(left_data, shape, device)?;
        let right = Tensor::from_vec(right_data, shape, device)?;

        Ok(Some(super::StereoBatch { left, right }))
    }

    fn reset(&mut self) {
        self.current_idx = 0;

        if self.shuffle {
            use rand::seq::SliceRandom;
            let mut rng = rand::thread_rng();
            self.indices.shuffle(&mut rng);
        }
    }

    fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    fn n_img(&self) -> usize {
        self.dataset.len()
    }
}
