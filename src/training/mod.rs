/// Training loop, learning rate schedule and checkpointing
pub mod checkpoint;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{
    load_checkpoint, read_metadata, save_checkpoint, Checkpoint, CheckpointManager, CheckpointMetadata,
};
pub use scheduler::{schedule_for, ConstantLr, LrSchedule, StepDecay};
pub use trainer::{EpochLosses, Trainer, TrainingSummary, FINISHED_SUBJECT, LOSS_NAMES};
