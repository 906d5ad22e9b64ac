/// Synthetic stereo training - exercise the full run loop on random image pairs
use candle_core::{DType, Tensor, D};
use candle_nn::{conv2d, AdamW, Conv2d, Conv2dConfig, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ndarray::Array4;

use monolab::data::{StereoBatchLoader, StereoDataset};
use monolab::models::{LossTerms, StereoLoss, StereoModel};
use monolab::training::{schedule_for, Trainer, LOSS_NAMES};
use monolab::{ExperimentReporter, RunConfig};

/// Two 3x3 convolutions ending in a sigmoid-scaled disparity map
struct TinyDisparityNet {
    conv1: Conv2d,
    conv2: Conv2d,
    varmap: VarMap,
}

impl TinyDisparityNet {
    const MAX_DISPARITY: f64 = 0.3;

    fn new(channels: usize, device: &candle_core::Device) -> candle_core::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = conv2d(channels, 8, 3, cfg, vb.pp("conv1"))?;
        let conv2 = conv2d(8, 1, 3, cfg, vb.pp("conv2"))?;
        Ok(Self { conv1, conv2, varmap })
    }
}

impl StereoModel for TinyDisparityNet {
    fn forward(&self, left: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let hidden = self.conv1.forward(left)?.relu()?;
        let disp = candle_nn::ops::sigmoid(&self.conv2.forward(&hidden)?)?;
        Ok(vec![(disp * Self::MAX_DISPARITY)?])
    }

    // No dropout or batch norm
    fn set_training(&mut self, _training: bool) {}

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

/// Stand-in for the monodepth loss: regress disparity onto the per-pixel
/// left/right difference, with a horizontal smoothness term
struct DifferenceLoss {
    smoothness_weight: f64,
}

impl StereoLoss for DifferenceLoss {
    fn compute(&self, disps: &[Tensor], left: &Tensor, right: &Tensor) -> candle_core::Result<LossTerms> {
        let disp = &disps[0];
        let target = (left - right)?.abs()?.mean_keepdim(1)?;

        let image = (disp - &target)?.abs()?.mean_all()?;

        let width = disp.dim(D::Minus1)?;
        let dx = (disp.narrow(D::Minus1, 1, width - 1)? - disp.narrow(D::Minus1, 0, width - 1)?)?;
        let disp_gradient = dx.abs()?.mean_all()?;

        let lr_consistency = (disp.mean_all()? - target.mean_all()?)?.abs()?;

        let total = ((&image + (&disp_gradient * self.smoothness_weight)?)? + &lr_consistency)?;

        Ok(LossTerms {
            total,
            image,
            disp_gradient,
            lr_consistency,
        })
    }
}

/// Random left images; right images are the left ones shifted one pixel
fn synthetic_pairs(n: usize, channels: usize, height: usize, width: usize) -> anyhow::Result<StereoDataset> {
    let left = Array4::<f32>::from_shape_fn((n, channels, height, width), |_| rand::random::<f32>());
    let right = Array4::<f32>::from_shape_fn((n, channels, height, width), |(i, c, y, x)| {
        left[[i, c, y, (x + 1) % width]]
    });
    Ok(StereoDataset::from_arrays(left, right)?)
}

fn main() -> anyhow::Result<()> {
    let output_dir = std::env::temp_dir().join("monolab-synthetic");
    let log_file = output_dir.join("train.log");
    monolab::logging::setup_logging(Some(&log_file), "info")?;

    log::info!("=== monolab - Synthetic Stereo Training ===");

    let config = RunConfig {
        output_dir,
        tag: "synthetic".to_string(),
        model: "tiny".to_string(),
        input_height: 16,
        input_width: 32,
        epochs: 5,
        learning_rate: 1e-2,
        batch_size: 4,
        num_workers: 0,
        do_augmentation: false,
        log_file: Some(log_file),
        ..RunConfig::default()
    };
    config.validate()?;

    let device = config.device()?;
    log::info!("Using device: {:?}", device);

    let train_set = synthetic_pairs(32, config.input_channels, config.input_height, config.input_width)?;
    let val_set = synthetic_pairs(8, config.input_channels, config.input_height, config.input_width)?;
    let train_loader = StereoBatchLoader::new(train_set, config.batch_size, true);
    let val_loader = StereoBatchLoader::new(val_set, config.batch_size, false);

    let model = TinyDisparityNet::new(config.input_channels, &device)?;
    let optimizer = AdamW::new(
        model.varmap().all_vars(),
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;

    let mut reporter = ExperimentReporter::new(&config, &LOSS_NAMES)?;

    // Sample of the untrained model
    let sample = synthetic_pairs(1, config.input_channels, config.input_height, config.input_width)?;
    let left = Tensor::from_iter(sample.get_left(0).iter().copied(), &device)?.reshape((
        1,
        config.input_channels,
        config.input_height,
        config.input_width,
    ))?;
    let disp = model.forward(&left)?[0].squeeze(0)?.squeeze(0)?;
    reporter.record_disparity_map(0, &(disp / TinyDisparityNet::MAX_DISPARITY)?, "disp_left")?;

    let mut trainer = Trainer::new(
        &config,
        model,
        DifferenceLoss {
            smoothness_weight: 0.1,
        },
        optimizer,
        schedule_for(config.adjust_lr),
        Box::new(train_loader),
        Box::new(val_loader),
        device,
    )?;

    let summary = trainer.train(&mut reporter, None)?;

    log::info!(
        "Best validation loss {:.6} at epoch {:?}",
        summary.best_val_loss,
        summary.best_epoch
    );
    log::info!("Artifacts in {}", reporter.layout().base_dir.display());

    let weights = reporter.layout().base_dir.join("final-model.safetensors");
    trainer.save(&weights)?;

    Ok(())
}
