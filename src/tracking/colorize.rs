/// Colormap quantization of disparity maps for visual samples
///
/// A single-channel map is normalized to [0, 1], quantized to 256 levels and
/// looked up in a palette table, producing a (3, height, width) RGB tensor.
use std::str::FromStr;

use candle_core::{DType, Tensor};

use crate::{MonolabError, Result};

/// Number of entries in every palette table
pub const PALETTE_SIZE: usize = 256;

/// Named color palette
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    Gray,
    Viridis,
    Plasma,
    Magma,
}

impl Palette {
    fn gradient(&self) -> Option<colorous::Gradient> {
        match self {
            Palette::Gray => None,
            Palette::Viridis => Some(colorous::VIRIDIS),
            Palette::Plasma => Some(colorous::PLASMA),
            Palette::Magma => Some(colorous::MAGMA),
        }
    }

    /// 256-entry RGB lookup table, components in [0, 1]
    ///
    /// The perceptual maps are matplotlib's 256-color tables as shipped by
    /// `colorous`, entry `i` is the map at `i / 255`.
    pub fn table(&self) -> Vec<[f32; 3]> {
        let last = (PALETTE_SIZE - 1) as f32;
        match self.gradient() {
            None => (0..PALETTE_SIZE)
                .map(|i| {
                    let v = i as f32 / last;
                    [v, v, v]
                })
                .collect(),
            Some(gradient) => (0..PALETTE_SIZE)
                .map(|i| {
                    let c = gradient.eval_rational(i, PALETTE_SIZE);
                    [c.r as f32 / 255.0, c.g as f32 / 255.0, c.b as f32 / 255.0]
                })
                .collect(),
        }
    }
}

impl FromStr for Palette {
    type Err = MonolabError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gray" | "grey" => Ok(Palette::Gray),
            "viridis" => Ok(Palette::Viridis),
            "plasma" => Ok(Palette::Plasma),
            "magma" => Ok(Palette::Magma),
            other => Err(MonolabError::Config(format!(
                "Unknown palette: {}. Must be 'gray', 'viridis', 'plasma' or 'magma'",
                other
            ))),
        }
    }
}

/// Normalize and quantize a map to palette indices
///
/// `value` is [height, width], [height, width, 1, ...] or a single row
/// [width]. `vmin`/`vmax` default to the data range. Returns the row-major
/// indices and the (height, width) of the map.
pub fn quantize(
    value: &Tensor,
    vmin: Option<f64>,
    vmax: Option<f64>,
) -> Result<(Vec<u8>, (usize, usize))> {
    let mut value = value.to_dtype(DType::F32)?;

    // Trailing singleton channel dims
    while value.rank() > 2 && value.dims()[value.rank() - 1] == 1 {
        value = value.squeeze(value.rank() - 1)?;
    }
    if value.rank() == 1 {
        value = value.unsqueeze(0)?;
    }
    let (height, width) = value.dims2().map_err(|_| {
        MonolabError::Config(format!(
            "Expected a single-channel map, got shape {:?}",
            value.dims()
        ))
    })?;

    let flat = value.flatten_all()?;
    let vmin = match vmin {
        Some(v) => v,
        None => flat.min(0)?.to_scalar::<f32>()? as f64,
    };
    let vmax = match vmax {
        Some(v) => v,
        None => flat.max(0)?.to_scalar::<f32>()? as f64,
    };

    let range = vmax - vmin;
    let last = (PALETTE_SIZE - 1) as f64;
    let indices = flat
        .to_dtype(DType::F64)?
        .to_vec1::<f64>()?
        .into_iter()
        .map(|v| {
            // Constant map, everything lands on the first palette entry
            let normalized = if range > 0.0 { (v - vmin) / range } else { 0.0 };
            (normalized * last).floor().clamp(0.0, last) as u8
        })
        .collect();

    Ok((indices, (height, width)))
}

/// Map a disparity map through a palette into a (3, height, width) tensor
pub fn colorize(
    value: &Tensor,
    vmin: Option<f64>,
    vmax: Option<f64>,
    palette: Palette,
) -> Result<Tensor> {
    let (indices, (height, width)) = quantize(value, vmin, vmax)?;
    let table = palette.table();

    let mut rgb = Vec::with_capacity(3 * indices.len());
    for channel in 0..3 {
        rgb.extend(indices.iter().map(|&i| table[i as usize][channel]));
    }

    Ok(Tensor::from_vec(rgb, (3, height, width), value.device())?)
}
