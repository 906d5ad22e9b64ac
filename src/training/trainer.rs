/// Epoch loop for stereo disparity training
use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::Optimizer;

use super::scheduler::LrSchedule;
use crate::data::{StereoBatch, StereoDataLoader};
use crate::models::{load_weights, state_dict, LossTerms, StereoLoss, StereoModel};
use crate::notify::{notify_best_effort, LogNotifier, Notifier};
use crate::tracking::ExperimentReporter;
use crate::{MonolabError, Result, RunConfig};

/// Metric names, in the order the four loss terms are recorded
pub const LOSS_NAMES: [&str; 4] = [
    "monodepth-loss",
    "image-loss",
    "disparity-gradient-loss",
    "lr-consistency-loss",
];

/// Subject of the message sent when training finishes
pub const FINISHED_SUBJECT: &str = "[MONOLAB] Training Finished";

/// Running sums (or averages) of the four loss terms over one pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochLosses {
    pub total: f64,
    pub image: f64,
    pub disp_gradient: f64,
    pub lr_consistency: f64,
}

fn scalar(t: &Tensor) -> Result<f64> {
    Ok(t.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?)
}

impl EpochLosses {
    /// Add one batch's loss terms
    pub fn accumulate(&mut self, terms: &LossTerms) -> Result<()> {
        self.total += scalar(&terms.total)?;
        self.image += scalar(&terms.image)?;
        self.disp_gradient += scalar(&terms.disp_gradient)?;
        self.lr_consistency += scalar(&terms.lr_consistency)?;
        Ok(())
    }

    /// Per-image averages of the sums
    pub fn per_image(&self, n_img: usize) -> Self {
        let n = n_img as f64;
        Self {
            total: self.total / n,
            image: self.image / n,
            disp_gradient: self.disp_gradient / n,
            lr_consistency: self.lr_consistency / n,
        }
    }

    /// Values in `LOSS_NAMES` order
    pub fn values(&self) -> [f64; 4] {
        [self.total, self.image, self.disp_gradient, self.lr_consistency]
    }
}

/// Outcome of a completed training run
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Lowest per-image validation loss, as tracked by the checkpoint manager
    pub best_val_loss: f64,
    pub best_epoch: Option<usize>,
    /// Learning rate applied in each epoch, index 0 is epoch 1
    pub learning_rates: Vec<f64>,
}

/// Trainer for a stereo disparity model
pub struct Trainer<M: StereoModel, L: StereoLoss, O: Optimizer> {
    model: M,
    loss: L,
    optimizer: O,
    schedule: Box<dyn LrSchedule>,
    train_loader: Box<dyn StereoDataLoader>,
    val_loader: Box<dyn StereoDataLoader>,
    base_lr: f64,
    epochs: usize,
    notify: Option<String>,
    device: Device,
}

impl<M: StereoModel, L: StereoLoss, O: Optimizer> Trainer<M, L, O> {
    /// Create new trainer
    ///
    /// Both loaders must contain at least one image pair.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &RunConfig,
        model: M,
        loss: L,
        optimizer: O,
        schedule: Box<dyn LrSchedule>,
        train_loader: Box<dyn StereoDataLoader>,
        val_loader: Box<dyn StereoDataLoader>,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;

        if train_loader.n_img() == 0 {
            return Err(MonolabError::Config("training set is empty".to_string()));
        }
        if val_loader.n_img() == 0 {
            return Err(MonolabError::Config("validation set is empty".to_string()));
        }

        log::info!(
            "Using a training data set with {} images ({} batches)",
            train_loader.n_img(),
            train_loader.num_batches()
        );
        log::info!(
            "Using a validation set with {} images ({} batches)",
            val_loader.n_img(),
            val_loader.num_batches()
        );

        Ok(Self {
            model,
            loss,
            optimizer,
            schedule,
            train_loader,
            val_loader,
            base_lr: config.learning_rate,
            epochs: config.epochs,
            notify: config.notify.clone(),
            device,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// One optimization step on a batch
    fn train_step(&mut self, batch: &StereoBatch) -> Result<LossTerms> {
        let disps = self.model.forward(&batch.left)?;
        let terms = self.loss.compute(&disps, &batch.left, &batch.right)?;

        // Gradients are rebuilt from scratch by every backward pass
        let grads = terms.total.backward()?;
        self.optimizer.step(&grads)?;

        Ok(terms)
    }

    /// Full pass over the training set, returns the loss sums
    pub fn train_epoch(&mut self) -> Result<EpochLosses> {
        let mut sums = EpochLosses::default();

        self.model.set_training(true);
        self.train_loader.reset();

        while let Some(batch) = self.train_loader.next_batch(&self.device)? {
            let terms = self.train_step(&batch)?;
            sums.accumulate(&terms)?;
        }

        Ok(sums)
    }

    /// Full pass over the validation set without parameter updates
    pub fn validate_epoch(&mut self) -> Result<EpochLosses> {
        let mut sums = EpochLosses::default();

        self.model.set_training(false);
        self.val_loader.reset();

        while let Some(batch) = self.val_loader.next_batch(&self.device)? {
            let disps = self.model.forward(&batch.left)?;
            let terms = self.loss.compute(&disps, &batch.left, &batch.right)?;
            sums.accumulate(&terms)?;
        }

        Ok(sums)
    }

    /// Full training loop
    ///
    /// Each epoch is committed to the reporter (four metrics, one checkpoint)
    /// only after both passes succeed. An error aborts the run and leaves
    /// the earlier epochs on disk; `finalize` runs only on success.
    pub fn train(
        &mut self,
        reporter: &mut ExperimentReporter,
        notifier: Option<&dyn Notifier>,
    ) -> Result<TrainingSummary> {
        log::info!("Starting training for {} epochs", self.epochs);

        let mut learning_rates = Vec::with_capacity(self.epochs);

        for epoch in 1..=self.epochs {
            let lr = self.schedule.lr_at_epoch(self.base_lr, epoch);
            self.optimizer.set_learning_rate(lr);
            learning_rates.push(lr);

            let started = Instant::now();

            let train = self.train_epoch()?.per_image(self.train_loader.n_img());
            let val = self.validate_epoch()?.per_image(self.val_loader.n_img());

            log::info!(
                "Epoch [{}/{}] time: {:.3} s, lr={:.6}",
                epoch,
                self.epochs,
                started.elapsed().as_secs_f64(),
                lr
            );

            for ((name, train_value), val_value) in LOSS_NAMES
                .iter()
                .zip(train.values())
                .zip(val.values())
            {
                reporter.record_epoch_metric(epoch, train_value, val_value, name)?;
            }

            let params = state_dict(self.model.varmap())?;
            reporter.add_checkpoint(&params, val.total, epoch)?;
        }

        let best_val_loss = reporter.best_val_loss();
        let message = format!("Finished Training. Best loss: {}", best_val_loss);
        log::info!("{}", message);

        if let Some(recipient) = &self.notify {
            let notifier = notifier.unwrap_or(&LogNotifier);
            notify_best_effort(notifier, recipient, FINISHED_SUBJECT, &message);
        }

        reporter.finalize()?;

        Ok(TrainingSummary {
            epochs: self.epochs,
            best_val_loss,
            best_epoch: reporter.checkpoints().best_epoch(),
            learning_rates,
        })
    }

    /// Save model weights as safetensors
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.model.varmap().save(path.as_ref())?;
        log::info!("Saved model to {:?}", path.as_ref());
        Ok(())
    }

    /// Load model weights saved by `save` or taken from a checkpoint
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        load_weights(self.model.varmap(), path)
    }
}
