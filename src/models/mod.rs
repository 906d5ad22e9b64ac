/// Model and loss interfaces consumed by the trainer
///
/// The network architecture and the loss mathematics live outside this crate;
/// the trainer only needs a forward pass, a train/eval toggle, the parameter
/// collection and the four loss terms.
use candle_core::{Result, Tensor};
use candle_nn::VarMap;

pub mod loader;

pub use loader::{load_weights, state_dict};

/// A stereo disparity network
pub trait StereoModel {
    /// Predict the disparity pyramid for a batch of left images
    ///
    /// `left`: [batch, channels, height, width]
    fn forward(&self, left: &Tensor) -> Result<Vec<Tensor>>;

    /// Switch between training and evaluation behaviour (dropout, batch norm)
    fn set_training(&mut self, training: bool);

    /// Parameter collection, shared with the optimizer and checkpoints
    fn varmap(&self) -> &VarMap;
}

/// The four scalar terms of the monodepth loss
#[derive(Debug, Clone)]
pub struct LossTerms {
    /// Weighted sum of the other terms, the one that is backpropagated
    pub total: Tensor,
    /// Appearance matching (SSIM + L1) term
    pub image: Tensor,
    /// Disparity smoothness term
    pub disp_gradient: Tensor,
    /// Left-right disparity consistency term
    pub lr_consistency: Tensor,
}

/// Loss of a predicted disparity pyramid against the stereo pair
pub trait StereoLoss {
    fn compute(&self, disps: &[Tensor], left: &Tensor, right: &Tensor) -> Result<LossTerms>;
}
