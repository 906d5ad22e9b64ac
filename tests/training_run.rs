//! Full training runs against stub model, loss and optimizer
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Init, Optimizer, VarBuilder, VarMap};
use ndarray::Array4;

use monolab::data::{StereoBatchLoader, StereoDataset};
use monolab::models::{LossTerms, StereoLoss, StereoModel};
use monolab::notify::Notifier;
use monolab::tracking::reporter::MetricReport;
use monolab::training::{read_metadata, schedule_for, Trainer, FINISHED_SUBJECT, LOSS_NAMES};
use monolab::{ExperimentReporter, MonolabError, RunConfig};

const BASE_LR: f64 = 1e-3;

struct ScaledInput {
    varmap: VarMap,
    scale: Tensor,
}

impl ScaledInput {
    fn new() -> candle_core::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let scale = vb.get_with_hints(1, "scale", Init::Const(1.0))?;
        Ok(Self { varmap, scale })
    }
}

impl StereoModel for ScaledInput {
    fn forward(&self, left: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        Ok(vec![left.broadcast_mul(&self.scale)?])
    }

    fn set_training(&mut self, _training: bool) {}

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

/// Loss that shrinks by one with every call and can fail on a chosen call
struct Decreasing {
    calls: Cell<usize>,
    fail_at: Option<usize>,
}

impl Decreasing {
    fn new(fail_at: Option<usize>) -> Self {
        Self {
            calls: Cell::new(0),
            fail_at,
        }
    }
}

impl StereoLoss for Decreasing {
    fn compute(
        &self,
        disps: &[Tensor],
        _left: &Tensor,
        _right: &Tensor,
    ) -> candle_core::Result<LossTerms> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if Some(call) == self.fail_at {
            candle_core::bail!("loss diverged on call {}", call);
        }

        let value = 1000.0 - call as f64;
        // Keeps the graph connected to the model parameters
        let total = ((disps[0].sum_all()? * 0.0)? + value)?;
        let constant = |x: f64| Tensor::new(x as f32, &Device::Cpu);

        Ok(LossTerms {
            total,
            image: constant(value / 2.0)?,
            disp_gradient: constant(value / 4.0)?,
            lr_consistency: constant(value / 8.0)?,
        })
    }
}

/// Optimizer that only records the learning rates it is given
struct RecordingOptimizer {
    lr: f64,
    history: Rc<RefCell<Vec<f64>>>,
    steps: Rc<Cell<usize>>,
}

impl Optimizer for RecordingOptimizer {
    type Config = f64;

    fn new(_vars: Vec<Var>, lr: f64) -> candle_core::Result<Self> {
        Ok(Self {
            lr,
            history: Rc::new(RefCell::new(Vec::new())),
            steps: Rc::new(Cell::new(0)),
        })
    }

    fn step(&mut self, _grads: &GradStore) -> candle_core::Result<()> {
        self.steps.set(self.steps.get() + 1);
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
        self.history.borrow_mut().push(lr);
    }
}

#[derive(Default)]
struct Inbox {
    messages: RefCell<Vec<(String, String, String)>>,
}

impl Notifier for Inbox {
    fn notify(&self, recipient: &str, subject: &str, body: &str) -> monolab::Result<()> {
        self.messages
            .borrow_mut()
            .push((recipient.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

fn loader(n_img: usize, batch_size: usize) -> Box<StereoBatchLoader> {
    let images = Array4::<f32>::ones((n_img, 3, 2, 4));
    let dataset = StereoDataset::from_arrays(images.clone(), images).unwrap();
    Box::new(StereoBatchLoader::new(dataset, batch_size, false))
}

fn config(output_dir: &std::path::Path, epochs: usize) -> RunConfig {
    RunConfig {
        output_dir: output_dir.to_path_buf(),
        tag: "stub".to_string(),
        epochs,
        learning_rate: BASE_LR,
        adjust_lr: true,
        batch_size: 2,
        ..RunConfig::default()
    }
}

type StubTrainer = Trainer<ScaledInput, Decreasing, RecordingOptimizer>;

fn trainer(config: &RunConfig, fail_at: Option<usize>) -> (StubTrainer, Rc<RefCell<Vec<f64>>>) {
    let model = ScaledInput::new().unwrap();
    let optimizer = RecordingOptimizer::new(model.varmap.all_vars(), config.learning_rate).unwrap();
    let history = optimizer.history.clone();

    // 4 training images in 2 batches, 2 validation images in 1 batch
    let trainer = Trainer::new(
        config,
        model,
        Decreasing::new(fail_at),
        optimizer,
        schedule_for(config.adjust_lr),
        loader(4, config.batch_size),
        loader(2, config.batch_size),
        Device::Cpu,
    )
    .unwrap();

    (trainer, history)
}

#[test]
fn test_forty_one_epochs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path(), 41);
    config.notify = Some("me@example.com".to_string());

    let mut reporter = ExperimentReporter::new(&config, &LOSS_NAMES)?;
    let (mut trainer, history) = trainer(&config, None);
    let inbox = Inbox::default();

    let summary = trainer.train(&mut reporter, Some(&inbox))?;

    // Three loss calls per epoch, the validation call comes last
    let last_val = (1000.0 - (41.0 * 3.0 - 1.0)) / 2.0;
    assert_eq!(summary.epochs, 41);
    assert_eq!(summary.best_epoch, Some(41));
    assert!((summary.best_val_loss - last_val).abs() < 1e-9);

    assert_eq!(summary.learning_rates.len(), 41);
    assert_eq!(summary.learning_rates[0], BASE_LR);
    assert_eq!(summary.learning_rates[34], BASE_LR / 2.0);
    assert_eq!(summary.learning_rates[40], BASE_LR / 4.0);
    assert_eq!(*history.borrow(), summary.learning_rates);
    assert_eq!(trainer.optimizer().steps.get(), 41 * 2);

    assert_eq!(reporter.metrics().total_records(), 41 * 4);
    for name in LOSS_NAMES {
        let series = reporter.metrics().get(name).unwrap();
        let epochs: Vec<usize> = series.val.iter().map(|(e, _)| *e).collect();
        assert_eq!(epochs, (1..=41).collect::<Vec<_>>());
    }

    // Train: mean of the two batch values over 2 images per batch
    let first = &reporter.metrics().get("monodepth-loss").unwrap();
    assert!((first.train[0].1 - (1000.0 + 999.0) / 4.0).abs() < 1e-9);
    assert!((first.val[0].1 - 998.0 / 2.0).abs() < 1e-9);
    let image = reporter.metrics().get("image-loss").unwrap();
    assert!((image.val[0].1 - 998.0 / 4.0).abs() < 1e-9);

    let layout = reporter.layout();
    let best = read_metadata(reporter.checkpoints().best_path())?;
    let last = read_metadata(reporter.checkpoints().last_path())?;
    assert_eq!(best.epoch, 41);
    assert_eq!(last.epoch, 41);
    assert!((best.val_loss - last_val).abs() < 1e-9);

    let report = MetricReport::load(&layout.metrics_path)?;
    assert_eq!(report.best_epoch, Some(41));
    assert_eq!(report.max_epochs, 41);
    assert_eq!(report.metrics.len(), 4);

    let args = std::fs::read_to_string(&layout.args_path)?;
    assert!(args.starts_with("Command line arguments: \n"));
    assert!(args.contains("epochs"));
    assert!(args.contains("= True"));
    assert!(args.contains("= None"));

    if cfg!(feature = "plots") {
        for plot in ["losses.png", "epoch-metric-train.png", "epoch-metric-val.png"] {
            let path = layout.plots_dir.join(plot);
            assert!(path.is_file(), "missing plot {}", path.display());
        }
    }

    let messages = inbox.messages.borrow();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "me@example.com");
    assert_eq!(messages[0].1, FINISHED_SUBJECT);
    assert!(messages[0].2.starts_with("Finished Training. Best loss: "));
    Ok(())
}

#[test]
fn test_failing_epoch_is_not_recorded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), 5);

    let mut reporter = ExperimentReporter::new(&config, &LOSS_NAMES)?;
    // Call 7 is the second training batch of epoch 3
    let (mut trainer, _) = trainer(&config, Some(7));

    let result = trainer.train(&mut reporter, None);
    assert!(matches!(result, Err(MonolabError::Candle(_))));

    for name in LOSS_NAMES {
        let series = reporter.metrics().get(name).unwrap();
        assert_eq!(series.last_epoch(), Some(2));
        assert_eq!(series.val.len(), 2);
    }

    assert_eq!(read_metadata(reporter.checkpoints().last_path())?.epoch, 2);
    assert!(!reporter.layout().metrics_path.exists());
    assert!(!reporter.layout().args_path.exists());
    Ok(())
}

#[test]
fn test_constant_lr_without_adjustment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path(), 3);
    config.adjust_lr = false;

    let mut reporter = ExperimentReporter::new(&config, &LOSS_NAMES)?;
    let (mut trainer, _) = trainer(&config, None);

    let summary = trainer.train(&mut reporter, None)?;
    assert_eq!(summary.learning_rates, vec![BASE_LR; 3]);
    Ok(())
}
