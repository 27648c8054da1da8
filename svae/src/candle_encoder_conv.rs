use crate::candle_arch_config::*;
use crate::candle_aux_layers::*;
use crate::candle_latent_gaussian::{GaussianParams, LatentCode};
use crate::candle_model_traits::EncoderModuleT;
use candle_core::{Result, Tensor};
use candle_nn::{Conv2d, Linear, Module, VarBuilder};

/// Activations of the convolutional trunk at every depth
#[derive(Clone, Debug)]
pub struct TrunkStages {
    /// after each convolution + relu (n x c x h x w)
    pub conv: Vec<Tensor>,
    /// flattened last convolution (n x chw)
    pub flat: Tensor,
    /// dense + relu (n x 16)
    pub hidden: Tensor,
}

/// Trunk stages plus the Gaussian head of a probabilistic encoder
#[derive(Clone, Debug)]
pub struct EncoderStages {
    pub trunk: TrunkStages,
    pub gaussian: GaussianParams,
}

/////////////////////////
// Convolutional trunk //
/////////////////////////

pub struct ConvTrunk {
    grid: (usize, usize),
    convs: Vec<Conv2d>,
    fc: Linear,
}

impl ConvTrunk {
    /// Will create a convolutional trunk with these variables:
    ///
    /// * `conv.{}.weight` where {} is the layer index
    /// * `fc.weight`
    pub fn new(input_type: InputType, vs: VarBuilder) -> Result<Self> {
        let mut convs = Vec::with_capacity(CONV_STRIDES.len());
        let mut prev_channels = 1;
        for (j, &stride) in CONV_STRIDES.iter().enumerate() {
            convs.push(same_conv2d(
                prev_channels,
                CONV_CHANNELS,
                CONV_KERNEL,
                stride,
                vs.pp(format!("conv.{}", j)),
            )?);
            prev_channels = CONV_CHANNELS;
        }

        let (h, w) = input_type.encoded_grid();
        let fc = candle_nn::linear(CONV_CHANNELS * h * w, TRUNK_DIM, vs.pp("fc"))?;

        Ok(Self {
            grid: input_type.grid_shape(),
            convs,
            fc,
        })
    }

    pub fn flat_dim(&self) -> usize {
        self.fc.weight().dims()[1]
    }

    pub fn num_convs(&self) -> usize {
        self.convs.len()
    }

    fn check_input(&self, x_nhwc: &Tensor) -> Result<()> {
        let (h, w) = self.grid;
        match x_nhwc.dims() {
            [_, xh, xw, 1] if *xh == h && *xw == w => Ok(()),
            dims => candle_core::bail!("expected input (n, {}, {}, 1), got {:?}", h, w, dims),
        }
    }

    /// Run the trunk and keep every activation
    ///
    /// * `x_nhwc` - input grid (n x h x w x 1)
    pub fn forward_stages(&self, x_nhwc: &Tensor) -> Result<TrunkStages> {
        self.check_input(x_nhwc)?;
        let mut h = to_channels_first(x_nhwc)?;
        let mut conv = Vec::with_capacity(self.convs.len());
        for layer in self.convs.iter() {
            h = layer.forward(&h)?.relu()?;
            conv.push(h.clone());
        }
        let flat = h.flatten_from(1)?;
        let hidden = self.fc.forward(&flat)?.relu()?;
        Ok(TrunkStages { conv, flat, hidden })
    }
}

impl Module for ConvTrunk {
    fn forward(&self, x_nhwc: &Tensor) -> Result<Tensor> {
        Ok(self.forward_stages(x_nhwc)?.hidden)
    }
}

///////////////////
// Gaussian head //
///////////////////

pub struct GaussianHead {
    n_latent: usize,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl GaussianHead {
    /// * `z.mean.weight`
    /// * `z.lnvar.weight`
    pub fn new(in_dim: usize, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            n_latent,
            z_mean: candle_nn::linear(in_dim, n_latent, vs.pp("z.mean"))?,
            z_lnvar: candle_nn::linear(in_dim, n_latent, vs.pp("z.lnvar"))?,
        })
    }

    ///
    /// Evaluate latent Gaussian parameters: mu and log_var
    /// z ~ (mu(h), log_var(h))
    pub fn latent_gaussian_params(&self, h_nh: &Tensor) -> Result<GaussianParams> {
        GaussianParams::new(self.z_mean.forward(h_nh)?, self.z_lnvar.forward(h_nh)?)
    }

    /// Gaussian parameters and a fresh sample from them
    pub fn forward_latent(&self, h_nh: &Tensor) -> Result<LatentCode> {
        LatentCode::sampled(self.latent_gaussian_params(h_nh)?, h_nh.clone())
    }

    pub fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

/////////////////////////////////////
// Probabilistic convolutional VAE //
/////////////////////////////////////

pub struct GaussianConvEncoder {
    trunk: ConvTrunk,
    head: GaussianHead,
}

impl GaussianConvEncoder {
    /// conv(1) -> conv(2) -> flatten -> dense(16) -> (mean, lnvar) -> z
    pub fn new(input_type: InputType, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        let trunk = ConvTrunk::new(input_type, vs.pp("trunk"))?;
        let head = GaussianHead::new(TRUNK_DIM, n_latent, vs.clone())?;
        Ok(Self { trunk, head })
    }

    pub fn trunk(&self) -> &ConvTrunk {
        &self.trunk
    }

    /// every intermediate activation, without sampling
    pub fn forward_stages(&self, x_nhwc: &Tensor) -> Result<EncoderStages> {
        let trunk = self.trunk.forward_stages(x_nhwc)?;
        let gaussian = self.head.latent_gaussian_params(&trunk.hidden)?;
        Ok(EncoderStages { trunk, gaussian })
    }
}

impl EncoderModuleT for GaussianConvEncoder {
    fn forward(&self, x_nhwc: &Tensor) -> Result<LatentCode> {
        let h_nh = self.trunk.forward(x_nhwc)?;
        self.head.forward_latent(&h_nh)
    }

    fn dim_latent(&self) -> usize {
        self.head.dim_latent()
    }
}

/////////////////////////////////
// Deterministic convolutional //
/////////////////////////////////

pub struct DeterministicConvEncoder {
    n_latent: usize,
    trunk: ConvTrunk,
    z: Linear,
}

impl DeterministicConvEncoder {
    /// * `trunk.*`
    /// * `z.weight`
    pub fn new(input_type: InputType, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            n_latent,
            trunk: ConvTrunk::new(input_type, vs.pp("trunk"))?,
            z: candle_nn::linear(TRUNK_DIM, n_latent, vs.pp("z"))?,
        })
    }
}

impl EncoderModuleT for DeterministicConvEncoder {
    fn forward(&self, x_nhwc: &Tensor) -> Result<LatentCode> {
        let h_nh = self.trunk.forward(x_nhwc)?;
        let z_nk = self.z.forward(&h_nh)?;
        Ok(LatentCode::deterministic(z_nk, h_nh))
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

///////////////////////
// Two-stage encoder //
///////////////////////

/// Stage 1 (`trunk`) and stage 2 (`head`) are separately usable; the
/// trunk output also feeds the classifier in a two-stage composite.
pub struct TwoStageEncoder {
    trunk: ConvTrunk,
    head: GaussianHead,
}

impl TwoStageEncoder {
    /// * `stage1.*` convolutional trunk
    /// * `stage2.z.{mean,lnvar}.*` Gaussian head
    pub fn new(input_type: InputType, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            trunk: ConvTrunk::new(input_type, vs.pp("stage1"))?,
            head: GaussianHead::new(TRUNK_DIM, n_latent, vs.pp("stage2"))?,
        })
    }

    pub fn trunk(&self) -> &ConvTrunk {
        &self.trunk
    }

    pub fn head(&self) -> &GaussianHead {
        &self.head
    }
}

impl EncoderModuleT for TwoStageEncoder {
    fn forward(&self, x_nhwc: &Tensor) -> Result<LatentCode> {
        let h_nh = self.trunk.forward(x_nhwc)?;
        self.head.forward_latent(&h_nh)
    }

    fn dim_latent(&self) -> usize {
        self.head.dim_latent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn stages_have_expected_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = GaussianConvEncoder::new(InputType::Raw, 3, vb)?;

        let x = Tensor::randn(0f32, 1f32, (4, 6, 100, 1), &dev)?;
        let stages = enc.forward_stages(&x)?;
        assert_eq!(stages.trunk.conv[0].dims(), &[4, 32, 6, 100]);
        assert_eq!(stages.trunk.conv[1].dims(), &[4, 32, 3, 50]);
        assert_eq!(stages.trunk.flat.dims(), &[4, 32 * 3 * 50]);
        assert_eq!(stages.trunk.hidden.dims(), &[4, 16]);
        assert_eq!(stages.gaussian.z_mean_nk.dims(), &[4, 3]);

        let latent = enc.forward(&x)?;
        assert_eq!(latent.z_nk.dims(), &[4, 3]);
        assert!(latent.gaussian.is_some());
        Ok(())
    }

    #[test]
    fn wrong_grid_rejected() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = DeterministicConvEncoder::new(InputType::Feat, 2, vb)?;
        let x = Tensor::zeros((2, 6, 100, 1), DType::F32, &dev)?;
        assert!(enc.forward(&x).is_err());
        Ok(())
    }
}
