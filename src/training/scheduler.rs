/// Per-epoch learning rate schedules
///
/// Schedules are pure functions of `(base_lr, epoch)`: the rate is recomputed
/// from the base at the start of every epoch, never compounded.

/// Learning rate policy applied at the start of each epoch
pub trait LrSchedule {
    /// Learning rate for a 1-based epoch
    fn lr_at_epoch(&self, base_lr: f64, epoch: usize) -> f64;
}

/// Step decay used for monodepth training
///
/// - epochs `[1, 30)`: `base_lr`
/// - epochs `[30, 40)`: `base_lr / 2`
/// - epochs `40..`: `base_lr / 4`
#[derive(Debug, Clone, Copy, Default)]
pub struct StepDecay;

impl StepDecay {
    pub const FIRST_DECAY_EPOCH: usize = 30;
    pub const SECOND_DECAY_EPOCH: usize = 40;
}

impl LrSchedule for StepDecay {
    fn lr_at_epoch(&self, base_lr: f64, epoch: usize) -> f64 {
        if epoch >= Self::SECOND_DECAY_EPOCH {
            base_lr / 4.0
        } else if epoch >= Self::FIRST_DECAY_EPOCH {
            base_lr / 2.0
        } else {
            base_lr
        }
    }
}

/// Keeps the base learning rate for the whole run
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantLr;

impl LrSchedule for ConstantLr {
    fn lr_at_epoch(&self, base_lr: f64, _epoch: usize) -> f64 {
        base_lr
    }
}

/// The schedule selected by `RunConfig::adjust_lr`
pub fn schedule_for(adjust_lr: bool) -> Box<dyn LrSchedule> {
    if adjust_lr {
        Box::new(StepDecay)
    } else {
        Box::new(ConstantLr)
    }
}
