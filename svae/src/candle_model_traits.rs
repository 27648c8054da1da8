use crate::candle_latent_gaussian::LatentCode;
use candle_core::{Result, Tensor, Var};

pub trait EncoderModuleT {
    /// An encoder that maps raw input to a latent code
    ///
    /// # Arguments
    /// * `x` - input data, `(n, h, w, 1)` grids or `(n, d)` vectors
    ///
    /// # Returns `LatentCode`
    /// * `z_nk` - latent code (n x k), freshly sampled if probabilistic
    /// * `gaussian` - `(z_mean_nk, z_lnvar_nk)` the sample came from
    fn forward(&self, x: &Tensor) -> Result<LatentCode>;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction in `(n, h, w, 1)`
    ///
    /// * `z_nk` - latent states
    /// * `label_nc` - class probabilities for conditioned decoders
    fn forward(&self, z_nk: &Tensor, label_nc: Option<&Tensor>) -> Result<Tensor>;

    fn dim_latent(&self) -> usize;
}

/// Which heads a composite model produces, known before running it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Reconstruction,
    Classification,
    Joint,
}

/// Tagged output of a composite forward pass
#[derive(Clone, Debug)]
pub enum CompositeOutput {
    Reconstruction(Tensor),
    Classification(Tensor),
    Joint { recon: Tensor, class_prob: Tensor },
}

impl CompositeOutput {
    pub fn from_heads(recon: Option<Tensor>, class_prob: Option<Tensor>) -> Result<Self> {
        match (recon, class_prob) {
            (Some(recon), Some(class_prob)) => Ok(Self::Joint { recon, class_prob }),
            (Some(recon), None) => Ok(Self::Reconstruction(recon)),
            (None, Some(class_prob)) => Ok(Self::Classification(class_prob)),
            (None, None) => candle_core::bail!("composite model without any output head"),
        }
    }

    pub fn kind(&self) -> OutputKind {
        match self {
            Self::Reconstruction(_) => OutputKind::Reconstruction,
            Self::Classification(_) => OutputKind::Classification,
            Self::Joint { .. } => OutputKind::Joint,
        }
    }

    pub fn recon(&self) -> Option<&Tensor> {
        match self {
            Self::Reconstruction(recon) | Self::Joint { recon, .. } => Some(recon),
            Self::Classification(_) => None,
        }
    }

    pub fn class_prob(&self) -> Option<&Tensor> {
        match self {
            Self::Classification(class_prob) | Self::Joint { class_prob, .. } => Some(class_prob),
            Self::Reconstruction(_) => None,
        }
    }
}

pub struct CompositeForward {
    pub latent: LatentCode,
    pub output: CompositeOutput,
}

/// Individual terms of a composite objective; `total` is what the
/// optimizer minimizes.
pub struct LossTerms {
    pub total: Tensor,
    pub reconstruction: Option<Tensor>,
    pub kl: Option<Tensor>,
    pub classification: Option<Tensor>,
}

pub trait CompositeModuleT {
    /// Run every head on one shared latent sample
    fn forward(&self, x: &Tensor) -> Result<CompositeForward>;

    /// Forward pass and the objective attached to this composite
    ///
    /// * `x` - input data
    /// * `y_nc` - one-hot labels, required iff there is a class head
    fn loss(&self, x: &Tensor, y_nc: Option<&Tensor>) -> Result<LossTerms>;

    fn output_kind(&self) -> OutputKind;

    /// Variables an optimizer is allowed to update
    fn trainable_vars(&self) -> Vec<Var>;
}
