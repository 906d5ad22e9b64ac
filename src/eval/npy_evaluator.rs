/// Evaluators over predicted disparities and ground-truth depths stored as
/// NumPy arrays
///
/// Predictions are disparities normalized by the image width, as written by
/// the prediction step to `disparities.npy`. They are converted to metric
/// depth with the KITTI camera before comparison:
/// `depth = focal * baseline / (disparity * width)`.
use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ndarray_npy::ReadNpyExt;

use super::{compute_errors, AccuracyMetrics, DepthEvaluator};
use crate::{MonolabError, Result};

/// Stereo baseline of the KITTI rig in meters
pub const KITTI_BASELINE: f64 = 0.54;

/// Smallest depth a prediction is clipped to
const MIN_PREDICTED_DEPTH: f64 = 1e-3;

/// Focal length in pixels of the KITTI cameras, keyed by image width
pub fn kitti_focal_length(width: usize) -> Option<f64> {
    match width {
        1242 => Some(721.5377),
        1241 => Some(718.856),
        1224 => Some(707.0493),
        1238 => Some(718.3351),
        _ => None,
    }
}

/// Width-normalized disparity to metric depth
pub fn disparity_to_depth(disparity: f64, width: usize, focal: f64, baseline: f64) -> f64 {
    focal * baseline / (disparity * width as f64)
}

/// Ground truth outside `(min_depth, max_depth)` is ignored
#[derive(Debug, Clone, Copy)]
pub struct DepthRange {
    pub min_depth: f64,
    pub max_depth: f64,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_depth: 0.0,
            max_depth: 80.0,
        }
    }
}

/// Crop of Garg et al. used on the Eigen split, as fractions of (height, width)
fn in_garg_crop(y: usize, x: usize, height: usize, width: usize) -> bool {
    let top = (0.40810811 * height as f64) as usize;
    let bottom = (0.99189189 * height as f64) as usize;
    let left = (0.03594771 * width as f64) as usize;
    let right = (0.96405229 * width as f64) as usize;
    y >= top && y < bottom && x >= left && x < right
}

fn read_array(path: &Path) -> Result<ArrayD<f32>> {
    <ArrayD<f32> as ReadNpyExt>::read_npy(File::open(path)?).map_err(|e| {
        MonolabError::Evaluation(format!("Failed to read {}: {}", path.display(), e))
    })
}

fn gt_file(ground_truth: &Path, file_name: &str) -> PathBuf {
    if ground_truth.is_dir() {
        ground_truth.join(file_name)
    } else {
        ground_truth.to_path_buf()
    }
}

/// Shared settings of the disparity evaluators
#[derive(Debug, Clone)]
struct Camera {
    range: DepthRange,
    baseline: f64,
    focal: Option<f64>,
}

impl Camera {
    fn evaluate(&self, predictions: &Path, gt_path: &Path, crop: bool) -> Result<AccuracyMetrics> {
        let disp = read_array(predictions)?;
        let gt = read_array(gt_path)?;

        if disp.shape() != gt.shape() {
            return Err(MonolabError::Evaluation(format!(
                "Shape mismatch: predictions {:?} != ground truth {:?}",
                disp.shape(),
                gt.shape()
            )));
        }
        if gt.ndim() < 2 {
            return Err(MonolabError::Evaluation(format!(
                "Expected [.., height, width] arrays, got {:?}",
                gt.shape()
            )));
        }

        let (height, width) = (gt.shape()[gt.ndim() - 2], gt.shape()[gt.ndim() - 1]);
        let focal = match self.focal {
            Some(focal) => focal,
            None => kitti_focal_length(width).ok_or_else(|| {
                MonolabError::Evaluation(format!(
                    "No KITTI focal length for image width {}, set one explicitly",
                    width
                ))
            })?,
        };

        let mut gt_valid = Vec::new();
        let mut pred_valid = Vec::new();
        for ((index, &g), &d) in gt.indexed_iter().zip(disp.iter()) {
            let (y, x) = (index[gt.ndim() - 2], index[gt.ndim() - 1]);
            if crop && !in_garg_crop(y, x, height, width) {
                continue;
            }

            let g = g as f64;
            if g <= self.range.min_depth || g >= self.range.max_depth {
                continue;
            }

            let depth = disparity_to_depth(d as f64, width, focal, self.baseline);
            gt_valid.push(g);
            pred_valid.push(depth.clamp(MIN_PREDICTED_DEPTH, self.range.max_depth));
        }

        log::debug!("{} of {} pixels evaluated", gt_valid.len(), gt.len());

        compute_errors(&gt_valid, &pred_valid)
    }
}

/// KITTI stereo 2015 training images against dense ground-truth depth
#[derive(Debug, Clone)]
pub struct KittiGtEvaluator {
    pub range: DepthRange,
    pub baseline: f64,
    /// Focal length override; looked up from the image width when `None`
    pub focal: Option<f64>,
}

impl Default for KittiGtEvaluator {
    fn default() -> Self {
        Self {
            range: DepthRange::default(),
            baseline: KITTI_BASELINE,
            focal: None,
        }
    }
}

impl KittiGtEvaluator {
    /// File read when the ground-truth path is a directory
    pub const GT_FILE: &'static str = "gt_depths.npy";

    fn camera(&self) -> Camera {
        Camera {
            range: self.range,
            baseline: self.baseline,
            focal: self.focal,
        }
    }
}

impl DepthEvaluator for KittiGtEvaluator {
    fn evaluate(&self, predictions: &Path, ground_truth: &Path) -> Result<AccuracyMetrics> {
        self.camera()
            .evaluate(predictions, &gt_file(ground_truth, Self::GT_FILE), false)
    }
}

/// Eigen split test images against sparse velodyne depth, Garg crop applied
#[derive(Debug, Clone)]
pub struct EigenEvaluator {
    pub range: DepthRange,
    pub baseline: f64,
    pub focal: Option<f64>,
}

impl Default for EigenEvaluator {
    fn default() -> Self {
        Self {
            range: DepthRange::default(),
            baseline: KITTI_BASELINE,
            focal: None,
        }
    }
}

impl EigenEvaluator {
    pub const GT_FILE: &'static str = "gt_depths_eigen.npy";

    fn camera(&self) -> Camera {
        Camera {
            range: self.range,
            baseline: self.baseline,
            focal: self.focal,
        }
    }
}

impl DepthEvaluator for EigenEvaluator {
    fn evaluate(&self, predictions: &Path, ground_truth: &Path) -> Result<AccuracyMetrics> {
        self.camera()
            .evaluate(predictions, &gt_file(ground_truth, Self::GT_FILE), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use ndarray_npy::WriteNpyExt;

    fn write<A: WriteNpyExt>(path: &Path, array: &A) {
        array.write_npy(File::create(path).unwrap()).unwrap();
    }

    fn disparity_for(depth: f64, width: usize, focal: f64) -> f32 {
        (focal * KITTI_BASELINE / (depth * width as f64)) as f32
    }

    #[test]
    fn test_disparity_to_depth() {
        let focal = kitti_focal_length(1242).unwrap();
        // 0.1 of the width at 1242 px is 124.2 px of disparity
        let depth = disparity_to_depth(0.1, 1242, focal, KITTI_BASELINE);
        assert!((depth - 721.5377 * 0.54 / 124.2).abs() < 1e-12);

        let d = disparity_for(20.0, 1242, focal) as f64;
        assert!((disparity_to_depth(d, 1242, focal, KITTI_BASELINE) - 20.0).abs() < 1e-4);

        assert_eq!(kitti_focal_length(640), None);
    }

    #[test]
    fn test_kitti_gt_converts_disparities() {
        let dir = tempfile::tempdir().unwrap();
        let pred_path = dir.path().join("disparities.npy");
        let gt_dir = dir.path().join("data_scene_flow");
        std::fs::create_dir(&gt_dir).unwrap();

        let width = 1242;
        let focal = kitti_focal_length(width).unwrap();
        let mut gt = Array3::<f32>::from_elem((1, 2, width), 20.0);
        // Missing ground truth
        gt[[0, 1, 0]] = 0.0;
        let mut disp = Array3::<f32>::from_elem((1, 2, width), disparity_for(20.0, width, focal));
        disp[[0, 1, 0]] = 0.5;
        write(&pred_path, &disp);
        write(&gt_dir.join(KittiGtEvaluator::GT_FILE), &gt);

        let metrics = KittiGtEvaluator::default().evaluate(&pred_path, &gt_dir).unwrap();
        assert!(metrics.abs_rel < 1e-5);
        assert_eq!(metrics.a1, 1.0);
    }

    #[test]
    fn test_unknown_width_needs_focal() {
        let dir = tempfile::tempdir().unwrap();
        let pred_path = dir.path().join("disparities.npy");
        let gt_path = dir.path().join("gt.npy");

        let gt = Array2::<f32>::from_elem((2, 4), 10.0);
        write(&pred_path, &Array2::<f32>::from_elem((2, 4), disparity_for(10.0, 4, 100.0)));
        write(&gt_path, &gt);

        assert!(matches!(
            KittiGtEvaluator::default().evaluate(&pred_path, &gt_path),
            Err(MonolabError::Evaluation(_))
        ));

        let evaluator = KittiGtEvaluator {
            focal: Some(100.0),
            ..KittiGtEvaluator::default()
        };
        let metrics = evaluator.evaluate(&pred_path, &gt_path).unwrap();
        assert!(metrics.abs_rel < 1e-5);
    }

    #[test]
    fn test_predictions_clipped_to_max_depth() {
        let dir = tempfile::tempdir().unwrap();
        let pred_path = dir.path().join("disparities.npy");
        let gt_path = dir.path().join("gt.npy");

        write(&gt_path, &Array2::<f32>::from_elem((1, 1), 40.0));
        // Zero disparity is infinitely far
        write(&pred_path, &Array2::<f32>::zeros((1, 1)));

        let evaluator = KittiGtEvaluator {
            focal: Some(100.0),
            ..KittiGtEvaluator::default()
        };
        let metrics = evaluator.evaluate(&pred_path, &gt_path).unwrap();
        // clipped to 80: |40 - 80| / 40
        assert!((metrics.abs_rel - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_eigen_applies_garg_crop() {
        let dir = tempfile::tempdir().unwrap();
        let pred_path = dir.path().join("disparities.npy");
        let gt_path = dir.path().join("gt.npy");

        let (focal, width) = (100.0, 10);
        let gt = Array2::<f32>::from_elem((10, width), 10.0);
        let mut disp = Array2::<f32>::from_elem((10, width), disparity_for(10.0, width, focal));
        // Top-left corner lies outside the crop
        disp[[0, 0]] = disparity_for(40.0, width, focal);
        write(&pred_path, &disp);
        write(&gt_path, &gt);

        let eigen = EigenEvaluator {
            focal: Some(focal),
            ..EigenEvaluator::default()
        };
        assert!(eigen.evaluate(&pred_path, &gt_path).unwrap().abs_rel < 1e-5);

        let kitti = KittiGtEvaluator {
            focal: Some(focal),
            ..KittiGtEvaluator::default()
        };
        assert!(kitti.evaluate(&pred_path, &gt_path).unwrap().abs_rel > 0.01);
    }

    #[test]
    fn test_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let pred_path = dir.path().join("disparities.npy");
        let gt_path = dir.path().join("gt.npy");
        write(&pred_path, &Array2::<f32>::zeros((2, 3)));
        write(&gt_path, &Array2::<f32>::zeros((3, 2)));

        assert!(KittiGtEvaluator::default().evaluate(&pred_path, &gt_path).is_err());
    }

    #[test]
    fn test_garg_crop_bounds() {
        // rows 4..9, cols 0..9 of a 10x10 image
        assert!(!in_garg_crop(3, 5, 10, 10));
        assert!(in_garg_crop(4, 0, 10, 10));
        assert!(in_garg_crop(8, 8, 10, 10));
        assert!(!in_garg_crop(9, 5, 10, 10));
        assert!(!in_garg_crop(5, 9, 10, 10));
    }
}
