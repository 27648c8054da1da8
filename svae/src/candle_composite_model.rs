use crate::candle_arch_config::*;
use crate::candle_classifier::ClassifierHead;
use crate::candle_decoder_conv::{ConvDecoder, LabelConditionedDecoder};
use crate::candle_encoder_conv::{DeterministicConvEncoder, GaussianConvEncoder, TwoStageEncoder};
use crate::candle_encoder_dense::DenseEncoder;
use crate::candle_latent_gaussian::LatentCode;
use crate::candle_loss_functions::*;
use crate::candle_model_traits::*;
use crate::candle_parameter_set::ParameterSet;

use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{Module, VarBuilder, VarMap};
use log::debug;

//////////////////////
// encoder variants //
//////////////////////

pub enum LatentEncoder {
    GaussianConv(GaussianConvEncoder),
    DeterministicConv(DeterministicConvEncoder),
    DeterministicDense(DenseEncoder),
    TwoStage(TwoStageEncoder),
}

impl LatentEncoder {
    pub fn new(config: &ArchConfig, vs: VarBuilder) -> Result<Self> {
        let (input_type, k) = (config.input_type, config.latent_dim);
        Ok(match config.encoder {
            EncoderKind::GaussianConv => {
                Self::GaussianConv(GaussianConvEncoder::new(input_type, k, vs)?)
            }
            EncoderKind::DeterministicConv => {
                Self::DeterministicConv(DeterministicConvEncoder::new(input_type, k, vs)?)
            }
            EncoderKind::DeterministicDense => {
                Self::DeterministicDense(DenseEncoder::for_input(input_type, k, vs)?)
            }
            EncoderKind::TwoStage => Self::TwoStage(TwoStageEncoder::new(input_type, k, vs)?),
        })
    }
}

impl EncoderModuleT for LatentEncoder {
    fn forward(&self, x: &Tensor) -> Result<LatentCode> {
        match self {
            Self::GaussianConv(enc) => enc.forward(x),
            Self::DeterministicConv(enc) => enc.forward(x),
            Self::DeterministicDense(enc) => enc.forward(x),
            Self::TwoStage(enc) => enc.forward(x),
        }
    }

    fn dim_latent(&self) -> usize {
        match self {
            Self::GaussianConv(enc) => enc.dim_latent(),
            Self::DeterministicConv(enc) => enc.dim_latent(),
            Self::DeterministicDense(enc) => enc.dim_latent(),
            Self::TwoStage(enc) => enc.dim_latent(),
        }
    }
}

//////////////////////
// decoder variants //
//////////////////////

pub enum LatentDecoder {
    Unconditional(ConvDecoder),
    LabelConditioned(LabelConditionedDecoder),
}

impl LatentDecoder {
    pub fn new(config: &ArchConfig, vs: VarBuilder) -> Result<Option<Self>> {
        let (input_type, k) = (config.input_type, config.latent_dim);
        Ok(match config.decoder {
            DecoderKind::None => None,
            DecoderKind::Unconditional => Some(Self::Unconditional(ConvDecoder::new(
                k,
                input_type,
                &config.up_strides,
                vs,
            )?)),
            DecoderKind::LabelConditioned => {
                Some(Self::LabelConditioned(LabelConditionedDecoder::new(
                    k,
                    config.n_class,
                    input_type,
                    &config.up_strides,
                    vs,
                )?))
            }
        })
    }
}

impl DecoderModuleT for LatentDecoder {
    fn forward(&self, z_nk: &Tensor, label_nc: Option<&Tensor>) -> Result<Tensor> {
        match self {
            Self::Unconditional(dec) => dec.forward(z_nk, label_nc),
            Self::LabelConditioned(dec) => dec.forward(z_nk, label_nc),
        }
    }

    fn dim_latent(&self) -> usize {
        match self {
            Self::Unconditional(dec) => dec.dim_latent(),
            Self::LabelConditioned(dec) => dec.dim_latent(),
        }
    }
}

fn new_classifier(config: &ArchConfig, vs: VarBuilder) -> Result<Option<ClassifierHead>> {
    let n_input = config.classifier_input_dim();
    Ok(match config.classifier {
        ClassifierKind::None => None,
        ClassifierKind::Linear => Some(ClassifierHead::new(n_input, &[], config.n_class, vs)?),
        ClassifierKind::TwoLayer { hidden } => Some(ClassifierHead::new(
            n_input,
            &[hidden],
            config.n_class,
            vs,
        )?),
    })
}

/////////////////////
// composite model //
/////////////////////

/// Encoder, optional decoder and optional classifier wired into one
/// trainable graph. Parameters live in `variable_map`; a frozen
/// composite is built from plain tensors and has an empty map.
pub struct CompositeModel {
    config: ArchConfig,
    encoder: LatentEncoder,
    decoder: Option<LatentDecoder>,
    classifier: Option<ClassifierHead>,
    variable_map: VarMap,
}

impl CompositeModel {
    /// Assemble any configuration with freshly initialized, trainable
    /// parameters:
    ///
    /// * `enc.*` encoder
    /// * `dec.*` decoder
    /// * `clf.*` classifier
    pub fn new(config: ArchConfig, device: &Device) -> anyhow::Result<Self> {
        config.validate()?;
        let variable_map = VarMap::new();
        let vs = VarBuilder::from_varmap(&variable_map, DType::F32, device);
        let model = Self::assemble(config, vs, variable_map)?;
        debug!("{}", model.summary());
        Ok(model)
    }

    /// Rebuild `config` from a parameter snapshot. The result has no
    /// trainable variables: every weight is a constant tensor.
    pub fn frozen(
        config: ArchConfig,
        weights: &ParameterSet,
        device: &Device,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let vs = weights.to_var_builder(DType::F32, device);
        let model = Self::assemble(config, vs, VarMap::new())?;
        debug!("frozen {}", model.summary());
        Ok(model)
    }

    fn assemble(config: ArchConfig, vs: VarBuilder, variable_map: VarMap) -> Result<Self> {
        let encoder = LatentEncoder::new(&config, vs.pp("enc"))?;
        let decoder = LatentDecoder::new(&config, vs.pp("dec"))?;
        let classifier = new_classifier(&config, vs.pp("clf"))?;

        Ok(Self {
            config,
            encoder,
            decoder,
            classifier,
            variable_map,
        })
    }

    pub fn config(&self) -> &ArchConfig {
        &self.config
    }

    pub fn encoder(&self) -> &LatentEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> Option<&LatentDecoder> {
        self.decoder.as_ref()
    }

    pub fn classifier(&self) -> Option<&ClassifierHead> {
        self.classifier.as_ref()
    }

    pub fn two_stage_encoder(&self) -> Option<&TwoStageEncoder> {
        match &self.encoder {
            LatentEncoder::TwoStage(enc) => Some(enc),
            _ => None,
        }
    }

    pub fn variable_map(&self) -> &VarMap {
        &self.variable_map
    }

    /// Deep copy of every trainable parameter
    pub fn parameter_set(&self) -> Result<ParameterSet> {
        ParameterSet::from_var_map(&self.variable_map)
    }

    pub fn num_parameters(&self) -> usize {
        self.variable_map
            .all_vars()
            .iter()
            .map(|v| v.elem_count())
            .sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "composite [{:?} / {:?} / {:?} / {:?}] input={} latent={} classes={} params={}",
            self.config.encoder,
            self.config.decoder,
            self.config.classifier,
            self.config.loss,
            self.config.input_type,
            self.config.latent_dim,
            self.config.n_class,
            self.num_parameters()
        )
    }

    /// Posterior mean of the latent code, for embedding extraction
    pub fn latent_mean(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.encoder.forward(x)?.mean().clone())
    }

    /// Decode chosen latent states, optionally conditioned on labels
    pub fn generate(&self, z_nk: &Tensor, label_nc: Option<&Tensor>) -> Result<Tensor> {
        match &self.decoder {
            Some(dec) => dec.forward(z_nk, label_nc),
            None => candle_core::bail!("this composite has no decoder"),
        }
    }

    /// Compute the configured objective from one forward pass
    ///
    /// * `x` - input the forward pass ran on
    /// * `fwd` - result of `forward(x)`
    /// * `y_nc` - one-hot labels
    pub fn loss_terms(
        &self,
        x: &Tensor,
        fwd: &CompositeForward,
        y_nc: Option<&Tensor>,
    ) -> Result<LossTerms> {
        composite_loss(
            self.config.loss,
            self.config.input_type.area() as f64,
            x,
            fwd,
            y_nc,
        )
    }
}

impl CompositeModuleT for CompositeModel {
    fn forward(&self, x: &Tensor) -> Result<CompositeForward> {
        let latent = self.encoder.forward(x)?;

        let class_prob = match &self.classifier {
            Some(clf) if self.config.classifier_reads_trunk() => {
                Some(clf.forward(&latent.hidden_nh)?)
            }
            Some(clf) => Some(clf.forward(&latent.z_nk)?),
            None => None,
        };

        let recon = match &self.decoder {
            Some(LatentDecoder::Unconditional(dec)) => Some(dec.forward(&latent.z_nk, None)?),
            Some(LatentDecoder::LabelConditioned(dec)) => match &class_prob {
                Some(prob_nc) => Some(dec.forward_conditioned(&latent.z_nk, prob_nc)?),
                None => candle_core::bail!("label-conditioned decoder without a classifier"),
            },
            None => None,
        };

        Ok(CompositeForward {
            latent,
            output: CompositeOutput::from_heads(recon, class_prob)?,
        })
    }

    fn loss(&self, x: &Tensor, y_nc: Option<&Tensor>) -> Result<LossTerms> {
        let fwd = self.forward(x)?;
        self.loss_terms(x, &fwd, y_nc)
    }

    fn output_kind(&self) -> OutputKind {
        match (self.config.has_decoder(), self.config.has_classifier()) {
            (true, true) => OutputKind::Joint,
            (true, false) => OutputKind::Reconstruction,
            _ => OutputKind::Classification,
        }
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.variable_map.all_vars()
    }
}

/// The objective each `LossKind` attaches to a composite
///
/// * `loss` - which terms and how they combine
/// * `area` - input grid area scaling the reconstruction error
/// * `x` - observed input
/// * `fwd` - forward pass on `x`
/// * `y_nc` - one-hot labels
pub fn composite_loss(
    loss: LossKind,
    area: f64,
    x: &Tensor,
    fwd: &CompositeForward,
    y_nc: Option<&Tensor>,
) -> Result<LossTerms> {
    let kl_n = if loss.has_kl() {
        match fwd.latent.kl_loss()? {
            Some(kl_n) => Some(kl_n),
            None => candle_core::bail!("{:?} needs a probabilistic encoder", loss),
        }
    } else {
        None
    };

    let reconstruction = if loss.has_reconstruction() {
        match fwd.output.recon() {
            Some(recon) => Some(scaled_mse_loss(x, recon, area)?),
            None => candle_core::bail!("{:?} needs a reconstruction head", loss),
        }
    } else {
        None
    };

    let ce_n = if loss.has_classification() {
        match (fwd.output.class_prob(), y_nc) {
            (Some(prob_nc), Some(y_nc)) => Some(categorical_cross_entropy(y_nc, prob_nc)?),
            (None, _) => candle_core::bail!("{:?} needs a class head", loss),
            (_, None) => candle_core::bail!("{:?} needs labels", loss),
        }
    } else {
        None
    };

    let total = match (&reconstruction, &kl_n, &ce_n) {
        (None, None, Some(ce_n)) => ce_n.mean_all()?,
        (None, Some(kl_n), Some(ce_n)) => class_kl_objective(ce_n, kl_n)?,
        (Some(recon), Some(kl_n), None) => recon_kl_objective(recon, kl_n)?,
        (Some(recon), Some(kl_n), Some(ce_n)) => {
            (recon_kl_objective(recon, kl_n)? + ce_n.mean_all()?)?
        }
        _ => candle_core::bail!("unsupported loss combination {:?}", loss),
    };

    Ok(LossTerms {
        total,
        reconstruction,
        kl: kl_n.map(|kl_n| kl_n.mean_all()).transpose()?,
        classification: ce_n.map(|ce_n| ce_n.mean_all()).transpose()?,
    })
}

//////////////
// builders //
//////////////

/// Supervised VAE: probabilistic conv encoder, decoder and linear
/// classifier sharing one latent sample
pub fn build_svae(
    latent_dim: usize,
    n_class: usize,
    input_type: InputType,
    device: &Device,
) -> anyhow::Result<CompositeModel> {
    CompositeModel::new(ArchConfig::svae(latent_dim, n_class, input_type), device)
}

/// Variational latent-space classifier without decoder
pub fn build_vcnn(
    latent_dim: usize,
    n_class: usize,
    input_type: InputType,
    device: &Device,
) -> anyhow::Result<CompositeModel> {
    CompositeModel::new(ArchConfig::vcnn(latent_dim, n_class, input_type), device)
}

/// Plain convolutional classifier
pub fn build_cnn(
    latent_dim: usize,
    n_class: usize,
    input_type: InputType,
    device: &Device,
) -> anyhow::Result<CompositeModel> {
    CompositeModel::new(ArchConfig::cnn(latent_dim, n_class, input_type), device)
}

/// Dense latent-space classifier on flat features
pub fn build_sae(
    latent_dim: usize,
    n_class: usize,
    input_type: InputType,
    device: &Device,
) -> anyhow::Result<CompositeModel> {
    CompositeModel::new(ArchConfig::sae(latent_dim, n_class, input_type), device)
}

/// Unsupervised VAE without classifier
pub fn build_vae(
    latent_dim: usize,
    input_type: InputType,
    device: &Device,
) -> anyhow::Result<CompositeModel> {
    CompositeModel::new(ArchConfig::vae(latent_dim, input_type), device)
}

/// Two-stage encoder; the decoder is conditioned on the classifier's
/// output for the same example
pub fn build_vae_s(
    latent_dim: usize,
    n_class: usize,
    input_type: InputType,
    device: &Device,
) -> anyhow::Result<CompositeModel> {
    CompositeModel::new(ArchConfig::vae_s(latent_dim, n_class, input_type), device)
}
