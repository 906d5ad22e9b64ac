/// Live telemetry of scalars and image samples
///
/// The reporter forwards every epoch metric and visual sample here. Sinks are
/// best effort: the reporter logs their errors and keeps training.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Tensor};
use tensorboard_rs::summary_writer::SummaryWriter;

use crate::{MonolabError, Result};

/// Receiver of live training events
pub trait TelemetrySink {
    /// Record several scalars under one main tag, e.g. `loss/{train,val}`
    fn add_scalars(&mut self, main_tag: &str, values: &[(&str, f64)], step: usize) -> Result<()>;

    /// Record an image sample laid out as (channels, height, width)
    fn add_image(&mut self, tag: &str, image: &Tensor, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Writes TensorBoard event files (`events.out.tfevents.*`) under `dir`
///
/// Grouped scalars land in one sub-directory per series, the way TensorBoard
/// lays out `add_scalars`.
pub struct TensorBoardWriter {
    dir: PathBuf,
    writer: SummaryWriter,
}

impl TensorBoardWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let writer = SummaryWriter::new(&dir);
        Ok(Self { dir, writer })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TelemetrySink for TensorBoardWriter {
    fn add_scalars(&mut self, main_tag: &str, values: &[(&str, f64)], step: usize) -> Result<()> {
        let values: HashMap<String, f32> = values
            .iter()
            .map(|(name, value)| (name.to_string(), *value as f32))
            .collect();
        self.writer.add_scalars(main_tag, &values, step);
        Ok(())
    }

    fn add_image(&mut self, tag: &str, image: &Tensor, step: usize) -> Result<()> {
        let dims = image.dims();
        if dims.len() != 3 || !matches!(dims[0], 1 | 3 | 4) {
            return Err(MonolabError::Telemetry(format!(
                "image {} must be (channels, height, width) with 1, 3 or 4 channels, got {:?}",
                tag, dims
            )));
        }

        // Samples are in [0, 1]
        let pixels: Vec<u8> = image
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();

        self.writer.add_image(tag, &pixels, dims, step);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn event_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if entry.file_name().to_string_lossy().starts_with("events.out.tfevents") {
                found.push(path);
            }
        }
    }
    found
}
