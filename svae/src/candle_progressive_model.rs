//! Progressive-network transfer of a supervised VAE.
//!
//! A trained source composite is rebuilt from a `ParameterSet` as
//! constants. A target branch of the same topology runs alongside it,
//! and every target stage after the first reads
//! `[source activation, target activation]` of the previous depth.
//! Only the target branch owns variables.

use crate::candle_arch_config::*;
use crate::candle_aux_layers::*;
use crate::candle_classifier::ClassifierHead;
use crate::candle_composite_model::{composite_loss, CompositeModel, LatentDecoder, LatentEncoder};
use crate::candle_decoder_conv::{ConvDecoder, DecoderStages};
use crate::candle_encoder_conv::{EncoderStages, GaussianConvEncoder, GaussianHead};
use crate::candle_latent_gaussian::LatentCode;
use crate::candle_model_traits::*;
use crate::candle_parameter_set::ParameterSet;

use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{Conv2d, ConvTranspose2d, Linear, Module, VarBuilder, VarMap};
use log::{debug, info};

///////////////////////////
// target encoder branch //
///////////////////////////

pub struct ProgressiveEncoder {
    convs: Vec<Conv2d>,
    fc: Linear,
    head: GaussianHead,
}

impl ProgressiveEncoder {
    /// * `conv.0.weight` input -> c
    /// * `conv.{j}.weight` [source, target] (2c) -> c
    /// * `fc.weight` [source, target] flattened -> 16
    /// * `z.{mean,lnvar}.weight` [source, target] (32) -> k
    pub fn new(input_type: InputType, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        let mut convs = Vec::with_capacity(CONV_STRIDES.len());
        for (j, &stride) in CONV_STRIDES.iter().enumerate() {
            let in_channels = if j == 0 { 1 } else { 2 * CONV_CHANNELS };
            convs.push(same_conv2d(
                in_channels,
                CONV_CHANNELS,
                CONV_KERNEL,
                stride,
                vs.pp(format!("conv.{}", j)),
            )?);
        }

        let (h, w) = input_type.encoded_grid();
        let fc = candle_nn::linear(2 * CONV_CHANNELS * h * w, TRUNK_DIM, vs.pp("fc"))?;
        let head = GaussianHead::new(2 * TRUNK_DIM, n_latent, vs.clone())?;

        Ok(Self { convs, fc, head })
    }

    /// * `x_nhwc` - input grid, already checked by the source trunk
    /// * `source` - frozen activations on the same input
    pub fn forward_with(&self, x_nhwc: &Tensor, source: &EncoderStages) -> Result<LatentCode> {
        let mut t = to_channels_first(x_nhwc)?;
        for (j, conv) in self.convs.iter().enumerate() {
            let input = if j == 0 {
                t
            } else {
                concat_features(&source.trunk.conv[j - 1], &t)?
            };
            t = conv.forward(&input)?.relu()?;
        }

        let t_flat = t.flatten_from(1)?;
        let t_hidden = self
            .fc
            .forward(&concat_features(&source.trunk.flat, &t_flat)?)?
            .relu()?;

        let joint = concat_features(&source.trunk.hidden, &t_hidden)?;
        let latent = self.head.forward_latent(&joint)?;
        Ok(LatentCode {
            hidden_nh: t_hidden,
            ..latent
        })
    }
}

///////////////////////////
// target decoder branch //
///////////////////////////

pub struct ProgressiveDecoder {
    grid: (usize, usize),
    fc: Linear,
    ups: Vec<ConvTranspose2d>,
    out: ConvTranspose2d,
}

impl ProgressiveDecoder {
    /// * `fc.weight` latent -> c x h x w
    /// * `up.{j}.weight` [source, target] (2c) -> c
    /// * `out.weight` [source, target] (2c) -> 1
    pub fn new(
        n_latent: usize,
        input_type: InputType,
        up_strides: &[usize],
        vs: VarBuilder,
    ) -> Result<Self> {
        let grid = input_type.encoded_grid();
        let fc = candle_nn::linear(n_latent, CONV_CHANNELS * grid.0 * grid.1, vs.pp("fc"))?;
        let ups = up_strides
            .iter()
            .enumerate()
            .map(|(j, &stride)| {
                same_conv_transpose2d(
                    2 * CONV_CHANNELS,
                    CONV_CHANNELS,
                    CONV_KERNEL,
                    stride,
                    vs.pp(format!("up.{}", j)),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let out = same_conv_transpose2d(2 * CONV_CHANNELS, 1, CONV_KERNEL, 1, vs.pp("out"))?;

        Ok(Self { grid, fc, ups, out })
    }

    /// * `z_nk` - target latent sample
    /// * `source` - frozen decoder activations on the same `z_nk`
    pub fn forward_with(&self, z_nk: &Tensor, source: &DecoderStages) -> Result<Tensor> {
        let (h, w) = self.grid;
        let n = z_nk.dim(0)?;
        let mut t = self
            .fc
            .forward(z_nk)?
            .relu()?
            .reshape((n, CONV_CHANNELS, h, w))?;
        let mut s = &source.grid;

        for (j, up) in self.ups.iter().enumerate() {
            t = up.forward(&concat_features(s, &t)?)?.relu()?;
            s = &source.ups[j];
        }

        to_channels_last(&self.out.forward(&concat_features(s, &t)?)?.tanh()?)
    }
}

///////////////////////
// progressive model //
///////////////////////

pub struct ProgressiveModel {
    config: ArchConfig,
    source: CompositeModel,
    encoder: ProgressiveEncoder,
    decoder: ProgressiveDecoder,
    classifier: ClassifierHead,
    variable_map: VarMap,
}

impl ProgressiveModel {
    /// Freeze `source_weights` into a `source_config` graph and attach
    /// a trainable target branch with these variables:
    ///
    /// * `target.enc.*`
    /// * `target.dec.*`
    /// * `target.clf.*`
    pub fn new(
        source_weights: &ParameterSet,
        source_config: ArchConfig,
        device: &Device,
    ) -> anyhow::Result<Self> {
        source_config.validate()?;
        anyhow::ensure!(
            source_config.encoder == EncoderKind::GaussianConv
                && source_config.decoder == DecoderKind::Unconditional
                && source_config.classifier != ClassifierKind::None,
            "progressive transfer needs a supervised VAE source, got {:?}",
            source_config
        );

        // the snapshot must hold exactly the parameters of this topology
        let expected = CompositeModel::new(source_config.clone(), device)?.parameter_set()?;
        let mut missing = expected
            .names()
            .filter(|name| !source_weights.contains(name))
            .collect::<Vec<_>>();
        missing.sort();
        anyhow::ensure!(
            missing.is_empty() && expected.len() == source_weights.len(),
            "source weights do not match the source topology (missing: {:?}, {} given vs {} expected)",
            missing,
            source_weights.len(),
            expected.len()
        );

        let source = CompositeModel::frozen(source_config.clone(), source_weights, device)?;

        let variable_map = VarMap::new();
        let vs = VarBuilder::from_varmap(&variable_map, DType::F32, device).pp("target");
        let (input_type, k) = (source_config.input_type, source_config.latent_dim);

        let encoder = ProgressiveEncoder::new(input_type, k, vs.pp("enc"))?;
        let decoder =
            ProgressiveDecoder::new(k, input_type, &source_config.up_strides, vs.pp("dec"))?;
        let classifier = ClassifierHead::new(k, &[], source_config.n_class, vs.pp("clf"))?;

        let model = Self {
            config: source_config,
            source,
            encoder,
            decoder,
            classifier,
            variable_map,
        };

        info!(
            "progressive network: {} frozen + {} trainable parameters",
            source_weights.num_elements(),
            model.num_parameters()
        );
        Ok(model)
    }

    pub fn config(&self) -> &ArchConfig {
        &self.config
    }

    /// frozen source composite
    pub fn source(&self) -> &CompositeModel {
        &self.source
    }

    pub fn classifier(&self) -> &ClassifierHead {
        &self.classifier
    }

    pub fn variable_map(&self) -> &VarMap {
        &self.variable_map
    }

    /// trainable target parameters only
    pub fn num_parameters(&self) -> usize {
        self.variable_map
            .all_vars()
            .iter()
            .map(|v| v.elem_count())
            .sum()
    }

    fn source_encoder(&self) -> Result<&GaussianConvEncoder> {
        match self.source.encoder() {
            LatentEncoder::GaussianConv(enc) => Ok(enc),
            _ => candle_core::bail!("source encoder is not a Gaussian conv encoder"),
        }
    }

    fn source_decoder(&self) -> Result<&ConvDecoder> {
        match self.source.decoder() {
            Some(LatentDecoder::Unconditional(dec)) => Ok(dec),
            _ => candle_core::bail!("source decoder is not unconditional"),
        }
    }

    /// Source encoder activations on `x`, computed once and detached
    pub fn frozen_encoder_stages(&self, x_nhwc: &Tensor) -> Result<EncoderStages> {
        let mut stages = self.source_encoder()?.forward_stages(x_nhwc)?;
        stages.trunk.conv = stages.trunk.conv.iter().map(|t| t.detach()).collect();
        stages.trunk.flat = stages.trunk.flat.detach();
        stages.trunk.hidden = stages.trunk.hidden.detach();
        stages.gaussian.z_mean_nk = stages.gaussian.z_mean_nk.detach();
        stages.gaussian.z_lnvar_nk = stages.gaussian.z_lnvar_nk.detach();
        Ok(stages)
    }

    /// Target latent code given the input
    pub fn encode(&self, x_nhwc: &Tensor) -> Result<LatentCode> {
        let source = self.frozen_encoder_stages(x_nhwc)?;
        self.encoder.forward_with(x_nhwc, &source)
    }

    /// Target reconstruction of chosen latent states
    pub fn decode(&self, z_nk: &Tensor) -> Result<Tensor> {
        let source = self.source_decoder()?.forward_stages(z_nk)?;
        self.decoder.forward_with(z_nk, &source)
    }
}

impl CompositeModuleT for ProgressiveModel {
    fn forward(&self, x: &Tensor) -> Result<CompositeForward> {
        let latent = self.encode(x)?;
        let recon = self.decode(&latent.z_nk)?;
        let class_prob = self.classifier.forward(&latent.z_nk)?;
        debug!("progressive forward on {:?}", x.dims());
        Ok(CompositeForward {
            latent,
            output: CompositeOutput::Joint { recon, class_prob },
        })
    }

    /// Reconstruction and KL come from the target's own latent
    /// distribution, plus the target classifier's cross-entropy.
    fn loss(&self, x: &Tensor, y_nc: Option<&Tensor>) -> Result<LossTerms> {
        let fwd = self.forward(x)?;
        composite_loss(
            LossKind::ReconstructionKlClassification,
            self.config.input_type.area() as f64,
            x,
            &fwd,
            y_nc,
        )
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Joint
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.variable_map.all_vars()
    }
}

/// Progressive network on top of a trained supervised VAE
///
/// * `source_weights` - `parameter_set()` of the trained source
/// * `source_config` - configuration the source was built with
pub fn build_pnn(
    source_weights: &ParameterSet,
    source_config: ArchConfig,
    device: &Device,
) -> anyhow::Result<ProgressiveModel> {
    ProgressiveModel::new(source_weights, source_config, device)
}
