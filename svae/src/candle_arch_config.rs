use crate::candle_aux_layers::same_conv_len;
use std::fmt;
use std::str::FromStr;

/// filters in every convolution / transposed convolution
pub const CONV_CHANNELS: usize = 32;
/// odd kernel width of every convolution
pub const CONV_KERNEL: usize = 3;
/// strides of the two encoder convolutions
pub const CONV_STRIDES: [usize; 2] = [1, 2];
/// width of the dense layer closing the convolutional trunk
pub const TRUNK_DIM: usize = 16;
/// dense encoder for flat feature vectors
pub const DENSE_LAYERS: [usize; 3] = [24, 12, 8];
/// hidden width of the two-layer classifier
pub const CLASSIFIER_HIDDEN: usize = 32;

/// Which of the two fixed input layouts a model consumes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    /// engineered features, 6 x 4 grid
    Feat,
    /// raw signal, 6 x 100 grid
    Raw,
}

impl InputType {
    /// (height, width) of the input grid
    pub fn grid_shape(&self) -> (usize, usize) {
        match self {
            InputType::Feat => (6, 4),
            InputType::Raw => (6, 100),
        }
    }

    pub fn area(&self) -> usize {
        let (h, w) = self.grid_shape();
        h * w
    }

    /// length of the flattened input
    pub fn flat_dim(&self) -> usize {
        self.area()
    }

    /// spatial grid after the encoder convolutions
    pub fn encoded_grid(&self) -> (usize, usize) {
        let (h, w) = self.grid_shape();
        CONV_STRIDES
            .iter()
            .fold((h, w), |(h, w), &s| (same_conv_len(h, s), same_conv_len(w, s)))
    }
}

impl FromStr for InputType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "feat" => Ok(InputType::Feat),
            "raw" => Ok(InputType::Raw),
            _ => anyhow::bail!("unknown input type `{}`: expected `feat` or `raw`", s),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputType::Feat => write!(f, "feat"),
            InputType::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderKind {
    /// conv trunk -> (z_mean, z_lnvar) -> sampler
    GaussianConv,
    /// conv trunk -> z
    DeterministicConv,
    /// dense 24 -> 12 -> 8 -> z
    DeterministicDense,
    /// conv trunk (stage 1) -> Gaussian head (stage 2)
    TwoStage,
}

impl EncoderKind {
    pub fn is_probabilistic(&self) -> bool {
        matches!(self, EncoderKind::GaussianConv | EncoderKind::TwoStage)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderKind {
    None,
    Unconditional,
    /// one-hot or soft labels are projected and concatenated with z
    LabelConditioned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassifierKind {
    None,
    /// dense + softmax
    Linear,
    /// dense + relu, dense + softmax
    TwoLayer { hidden: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    /// mean cross-entropy
    Classification,
    /// mean((ce + kl) / 100) as one scalar
    ClassificationKl,
    /// mean((area * mse + kl) / 100)
    ReconstructionKl,
    /// mean((area * mse + kl) / 100) + mean cross-entropy of the class head
    ReconstructionKlClassification,
}

impl LossKind {
    pub fn has_reconstruction(&self) -> bool {
        matches!(
            self,
            LossKind::ReconstructionKl | LossKind::ReconstructionKlClassification
        )
    }

    pub fn has_classification(&self) -> bool {
        !matches!(self, LossKind::ReconstructionKl)
    }

    pub fn has_kl(&self) -> bool {
        !matches!(self, LossKind::Classification)
    }
}

/// Everything needed to assemble one composite model
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchConfig {
    pub input_type: InputType,
    pub latent_dim: usize,
    pub n_class: usize,
    pub encoder: EncoderKind,
    pub decoder: DecoderKind,
    pub classifier: ClassifierKind,
    pub loss: LossKind,
    /// strides of the hidden transposed convolutions in the decoder
    pub up_strides: Vec<usize>,
}

impl ArchConfig {
    /// supervised VAE: reconstruction and class heads on one sample
    pub fn svae(latent_dim: usize, n_class: usize, input_type: InputType) -> Self {
        Self {
            input_type,
            latent_dim,
            n_class,
            encoder: EncoderKind::GaussianConv,
            decoder: DecoderKind::Unconditional,
            classifier: ClassifierKind::Linear,
            loss: LossKind::ReconstructionKlClassification,
            up_strides: vec![2],
        }
    }

    /// variational latent classifier, no decoder
    pub fn vcnn(latent_dim: usize, n_class: usize, input_type: InputType) -> Self {
        Self {
            decoder: DecoderKind::None,
            loss: LossKind::ClassificationKl,
            up_strides: vec![],
            ..Self::svae(latent_dim, n_class, input_type)
        }
    }

    /// plain convolutional classifier
    pub fn cnn(latent_dim: usize, n_class: usize, input_type: InputType) -> Self {
        Self {
            encoder: EncoderKind::DeterministicConv,
            loss: LossKind::Classification,
            ..Self::vcnn(latent_dim, n_class, input_type)
        }
    }

    /// dense classifier on flat feature vectors
    pub fn sae(latent_dim: usize, n_class: usize, input_type: InputType) -> Self {
        Self {
            encoder: EncoderKind::DeterministicDense,
            ..Self::cnn(latent_dim, n_class, input_type)
        }
    }

    /// unsupervised VAE, no classifier
    pub fn vae(latent_dim: usize, input_type: InputType) -> Self {
        Self {
            n_class: 0,
            classifier: ClassifierKind::None,
            loss: LossKind::ReconstructionKl,
            ..Self::svae(latent_dim, 0, input_type)
        }
    }

    /// two-stage encoder with a label-conditioned decoder
    pub fn vae_s(latent_dim: usize, n_class: usize, input_type: InputType) -> Self {
        Self {
            encoder: EncoderKind::TwoStage,
            decoder: DecoderKind::LabelConditioned,
            classifier: ClassifierKind::TwoLayer {
                hidden: CLASSIFIER_HIDDEN,
            },
            up_strides: vec![1, 2],
            ..Self::svae(latent_dim, n_class, input_type)
        }
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder != DecoderKind::None
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier != ClassifierKind::None
    }

    /// the two-stage classifier reads the stage-1 trunk, every other
    /// classifier reads the latent sample
    pub fn classifier_reads_trunk(&self) -> bool {
        self.encoder == EncoderKind::TwoStage
    }

    pub fn classifier_input_dim(&self) -> usize {
        if self.classifier_reads_trunk() {
            TRUNK_DIM
        } else {
            self.latent_dim
        }
    }

    /// Reject inconsistent combinations before any layer is built
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.latent_dim > 0, "latent_dim must be positive");

        anyhow::ensure!(
            self.has_classifier() == self.loss.has_classification(),
            "{:?} loss does not match classifier {:?}",
            self.loss,
            self.classifier
        );
        anyhow::ensure!(
            self.has_decoder() == self.loss.has_reconstruction(),
            "{:?} loss does not match decoder {:?}",
            self.loss,
            self.decoder
        );

        if self.has_classifier() || self.decoder == DecoderKind::LabelConditioned {
            anyhow::ensure!(self.n_class > 0, "n_class must be positive");
        }

        if let ClassifierKind::TwoLayer { hidden } = self.classifier {
            anyhow::ensure!(hidden > 0, "classifier hidden width must be positive");
        }

        if self.loss.has_kl() {
            anyhow::ensure!(
                self.encoder.is_probabilistic(),
                "KL term needs a probabilistic encoder, got {:?}",
                self.encoder
            );
        }

        if self.has_decoder() {
            anyhow::ensure!(
                self.encoder != EncoderKind::DeterministicDense,
                "dense encoder cannot feed a convolutional decoder"
            );
            anyhow::ensure!(
                self.decoder != DecoderKind::LabelConditioned || self.has_classifier(),
                "label-conditioned decoder needs a classifier head"
            );
            anyhow::ensure!(
                self.up_strides.iter().all(|&s| s == 1 || s == 2)
                    && self.up_strides.iter().filter(|&&s| s == 2).count() == 1,
                "decoder must upsample exactly once by 2, got strides {:?}",
                self.up_strides
            );
        }

        Ok(())
    }
}
