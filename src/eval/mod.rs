/// Depth accuracy evaluation
///
/// Evaluators compare saved predictions against ground truth and report the
/// seven standard monocular depth metrics. The evaluation mode of a run is an
/// `EvaluatorKind` resolved to a concrete evaluator through an
/// `EvaluatorRegistry`.
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{MonolabError, Result, RunConfig};

pub mod npy_evaluator;

pub use npy_evaluator::{
    disparity_to_depth, kitti_focal_length, DepthRange, EigenEvaluator, KittiGtEvaluator,
};

/// Which ground truth a run is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluatorKind {
    /// The 697 test images of the Eigen split, velodyne ground truth
    Eigen,
    /// KITTI stereo 2015 training images with dense ground truth
    KittiGt,
}

impl EvaluatorKind {
    pub const ALL: [EvaluatorKind; 2] = [EvaluatorKind::Eigen, EvaluatorKind::KittiGt];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluatorKind::Eigen => "eigen",
            EvaluatorKind::KittiGt => "kitti-gt",
        }
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluatorKind {
    type Err = MonolabError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eigen" => Ok(EvaluatorKind::Eigen),
            "kitti-gt" => Ok(EvaluatorKind::KittiGt),
            other => Err(MonolabError::Config(format!(
                "Unknown evaluation mode: {}. Must be 'eigen' or 'kitti-gt'",
                other
            ))),
        }
    }
}

/// The seven depth accuracy metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub abs_rel: f64,
    pub sq_rel: f64,
    pub rms: f64,
    pub log_rms: f64,
    /// Fraction of pixels with max(gt/pred, pred/gt) < 1.25
    pub a1: f64,
    /// ... < 1.25^2
    pub a2: f64,
    /// ... < 1.25^3
    pub a3: f64,
}

impl AccuracyMetrics {
    pub const HEADER: [&'static str; 7] = ["abs_rel", "sq_rel", "rms", "log_rms", "a1", "a2", "a3"];

    /// Header row as logged after an evaluation
    pub fn header_row() -> String {
        Self::HEADER
            .iter()
            .map(|name| format!("{:>10}", name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Value row aligned with `header_row`
    pub fn value_row(&self) -> String {
        format!(
            "{:10.4}, {:10.4}, {:10.3}, {:10.3}, {:10.3}, {:10.3}, {:10.3}",
            self.abs_rel, self.sq_rel, self.rms, self.log_rms, self.a1, self.a2, self.a3
        )
    }
}

/// Standard monodepth error metrics over matching ground-truth and predicted
/// depths (both strictly positive)
pub fn compute_errors(gt: &[f64], pred: &[f64]) -> Result<AccuracyMetrics> {
    if gt.len() != pred.len() {
        return Err(MonolabError::Evaluation(format!(
            "ground truth has {} values, prediction has {}",
            gt.len(),
            pred.len()
        )));
    }
    if gt.is_empty() {
        return Err(MonolabError::Evaluation(
            "no valid pixels to evaluate".to_string(),
        ));
    }

    let n = gt.len() as f64;
    let (mut a1, mut a2, mut a3) = (0.0, 0.0, 0.0);
    let (mut abs_rel, mut sq_rel, mut sq_err, mut sq_log_err) = (0.0, 0.0, 0.0, 0.0);

    for (&g, &p) in gt.iter().zip(pred) {
        let thresh = (g / p).max(p / g);
        if thresh < 1.25 {
            a1 += 1.0;
        }
        if thresh < 1.25f64.powi(2) {
            a2 += 1.0;
        }
        if thresh < 1.25f64.powi(3) {
            a3 += 1.0;
        }

        let diff = g - p;
        abs_rel += diff.abs() / g;
        sq_rel += diff * diff / g;
        sq_err += diff * diff;
        let log_diff = g.ln() - p.ln();
        sq_log_err += log_diff * log_diff;
    }

    Ok(AccuracyMetrics {
        abs_rel: abs_rel / n,
        sq_rel: sq_rel / n,
        rms: (sq_err / n).sqrt(),
        log_rms: (sq_log_err / n).sqrt(),
        a1: a1 / n,
        a2: a2 / n,
        a3: a3 / n,
    })
}

/// Compares saved predictions with ground truth
pub trait DepthEvaluator {
    fn evaluate(&self, predictions: &Path, ground_truth: &Path) -> Result<AccuracyMetrics>;
}

/// Lookup table from evaluation mode to evaluator
#[derive(Default)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<EvaluatorKind, Box<dyn DepthEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the disparity evaluators (depth range 0..80 m, KITTI camera)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EvaluatorKind::Eigen, Box::new(EigenEvaluator::default()));
        registry.register(EvaluatorKind::KittiGt, Box::new(KittiGtEvaluator::default()));
        registry
    }

    /// Register an evaluator, replacing any previous one for `kind`
    pub fn register(&mut self, kind: EvaluatorKind, evaluator: Box<dyn DepthEvaluator>) {
        self.evaluators.insert(kind, evaluator);
    }

    pub fn get(&self, kind: EvaluatorKind) -> Result<&dyn DepthEvaluator> {
        self.evaluators
            .get(&kind)
            .map(|e| e.as_ref())
            .ok_or_else(|| {
                MonolabError::Evaluation(format!("no evaluator registered for '{}'", kind))
            })
    }
}

/// Ground truth location of a mode below the dataset root
pub fn ground_truth_path(kind: EvaluatorKind, data_dir: &Path) -> std::path::PathBuf {
    match kind {
        EvaluatorKind::KittiGt => data_dir.join("data_scene_flow"),
        EvaluatorKind::Eigen => data_dir.to_path_buf(),
    }
}

/// Run the evaluator registered for `kind` and log the metrics table
pub fn evaluate_run(
    registry: &EvaluatorRegistry,
    kind: EvaluatorKind,
    predictions: &Path,
    ground_truth: &Path,
) -> Result<AccuracyMetrics> {
    log::info!(
        "Evaluating {} against {} ({})",
        predictions.display(),
        ground_truth.display(),
        kind
    );

    let metrics = registry.get(kind)?.evaluate(predictions, ground_truth)?;

    log::info!("{}", AccuracyMetrics::header_row());
    log::info!("{}", metrics.value_row());

    Ok(metrics)
}

/// File the prediction step leaves in the output directory
pub const PREDICTIONS_FILE: &str = "disparities.npy";

/// Evaluate the predictions of a run if `config.eval` selects a mode
pub fn evaluate_configured(
    registry: &EvaluatorRegistry,
    config: &RunConfig,
) -> Result<Option<AccuracyMetrics>> {
    let Some(kind) = config.eval else {
        log::debug!("No evaluation mode configured");
        return Ok(None);
    };

    let predictions = config.output_dir.join(PREDICTIONS_FILE);
    let ground_truth = ground_truth_path(kind, &config.data_dir);
    evaluate_run(registry, kind, &predictions, &ground_truth).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(AccuracyMetrics);

    impl DepthEvaluator for Fixed {
        fn evaluate(&self, _: &Path, _: &Path) -> Result<AccuracyMetrics> {
            Ok(self.0)
        }
    }

    fn metrics(abs_rel: f64) -> AccuracyMetrics {
        AccuracyMetrics {
            abs_rel,
            sq_rel: 0.0,
            rms: 0.0,
            log_rms: 0.0,
            a1: 1.0,
            a2: 1.0,
            a3: 1.0,
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("eigen".parse::<EvaluatorKind>().unwrap(), EvaluatorKind::Eigen);
        assert_eq!("kitti-gt".parse::<EvaluatorKind>().unwrap(), EvaluatorKind::KittiGt);
        assert!(matches!(
            "kitti".parse::<EvaluatorKind>(),
            Err(MonolabError::Config(_))
        ));
        for kind in EvaluatorKind::ALL {
            assert_eq!(kind.to_string().parse::<EvaluatorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_registry_dispatches_by_kind() {
        let mut registry = EvaluatorRegistry::new();
        registry.register(EvaluatorKind::Eigen, Box::new(Fixed(metrics(0.1))));
        registry.register(EvaluatorKind::KittiGt, Box::new(Fixed(metrics(0.2))));

        let p = Path::new("disparities.npy");
        let eigen = evaluate_run(&registry, EvaluatorKind::Eigen, p, p).unwrap();
        let kitti = evaluate_run(&registry, EvaluatorKind::KittiGt, p, p).unwrap();
        assert_eq!(eigen.abs_rel, 0.1);
        assert_eq!(kitti.abs_rel, 0.2);
    }

    #[test]
    fn test_missing_registration_is_fatal() {
        let registry = EvaluatorRegistry::new();
        let p = Path::new("disparities.npy");
        assert!(matches!(
            evaluate_run(&registry, EvaluatorKind::Eigen, p, p),
            Err(MonolabError::Evaluation(_))
        ));
    }

    #[test]
    fn test_perfect_prediction() {
        let gt = [1.0, 5.0, 20.0];
        let m = compute_errors(&gt, &gt).unwrap();
        assert_eq!(m.abs_rel, 0.0);
        assert_eq!(m.rms, 0.0);
        assert_eq!((m.a1, m.a2, m.a3), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_known_errors() {
        // pred = 2 * gt: a ratio of 2 is above 1.25^3, every threshold fails
        let gt = [1.0, 2.0];
        let pred = [2.0, 4.0];
        let m = compute_errors(&gt, &pred).unwrap();
        assert!((m.abs_rel - 1.0).abs() < 1e-12);
        // sq_rel = mean(1/1, 4/2) = 1.5
        assert!((m.sq_rel - 1.5).abs() < 1e-12);
        // rms = sqrt(mean(1, 4)) = sqrt(2.5)
        assert!((m.rms - 2.5f64.sqrt()).abs() < 1e-12);
        assert!((m.log_rms - 2f64.ln()).abs() < 1e-12);
        assert_eq!((m.a1, m.a2, m.a3), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_mismatched_or_empty_input() {
        assert!(compute_errors(&[1.0], &[1.0, 2.0]).is_err());
        assert!(compute_errors(&[], &[]).is_err());
    }

    #[test]
    fn test_rows_align() {
        let header = AccuracyMetrics::header_row();
        let values = metrics(0.25).value_row();
        assert_eq!(header.len(), values.len());
        assert!(values.starts_with("    0.2500"));
    }

    #[test]
    fn test_defaults_register_distinct_evaluators() {
        use ndarray::Array2;
        use ndarray_npy::WriteNpyExt;

        let dir = tempfile::tempdir().unwrap();
        let pred = dir.path().join(PREDICTIONS_FILE);
        let gt = dir.path().join("gt.npy");

        // Width 1242 selects the KITTI focal length; the error sits in row 0,
        // above the Eigen crop
        let width = 1242;
        let focal = kitti_focal_length(width).unwrap();
        let on_target = (focal * npy_evaluator::KITTI_BASELINE / (10.0 * width as f64)) as f32;
        let mut disp = Array2::<f32>::from_elem((4, width), on_target);
        disp.row_mut(0).fill(on_target / 2.0);
        disp.write_npy(std::fs::File::create(&pred).unwrap()).unwrap();
        Array2::<f32>::from_elem((4, width), 10.0)
            .write_npy(std::fs::File::create(&gt).unwrap())
            .unwrap();

        let registry = EvaluatorRegistry::with_defaults();
        let eigen = evaluate_run(&registry, EvaluatorKind::Eigen, &pred, &gt).unwrap();
        let kitti = evaluate_run(&registry, EvaluatorKind::KittiGt, &pred, &gt).unwrap();
        assert!(eigen.abs_rel < 1e-5);
        // a quarter of the pixels are predicted at twice the depth
        assert!((kitti.abs_rel - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_evaluate_configured() {
        let mut registry = EvaluatorRegistry::new();
        registry.register(EvaluatorKind::KittiGt, Box::new(Fixed(metrics(0.3))));

        let mut config = RunConfig::default();
        assert!(evaluate_configured(&registry, &config).unwrap().is_none());

        config.eval = Some(EvaluatorKind::KittiGt);
        let m = evaluate_configured(&registry, &config).unwrap().unwrap();
        assert_eq!(m.abs_rel, 0.3);

        config.eval = Some(EvaluatorKind::Eigen);
        assert!(evaluate_configured(&registry, &config).is_err());
    }

    #[test]
    fn test_ground_truth_paths() {
        let root = Path::new("/data/kitti");
        assert_eq!(
            ground_truth_path(EvaluatorKind::KittiGt, root),
            Path::new("/data/kitti/data_scene_flow")
        );
        assert_eq!(ground_truth_path(EvaluatorKind::Eigen, root), root);
    }
}
