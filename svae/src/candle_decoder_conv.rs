use crate::candle_arch_config::{InputType, CONV_CHANNELS, CONV_KERNEL};
use crate::candle_aux_layers::*;
use crate::candle_model_traits::DecoderModuleT;
use candle_core::{Result, Tensor};
use candle_nn::{ConvTranspose2d, Linear, Module, VarBuilder};

/// Activations of the decoder at every depth
#[derive(Clone, Debug)]
pub struct DecoderStages {
    /// dense expansion reshaped to (n x c x h x w)
    pub grid: Tensor,
    /// after each hidden transposed convolution + relu
    pub ups: Vec<Tensor>,
    /// tanh output (n x h x w x 1)
    pub recon: Tensor,
}

///////////////////////////
// Unconditional decoder //
///////////////////////////

pub struct ConvDecoder {
    n_latent: usize,
    grid: (usize, usize),
    fc: Linear,
    ups: Vec<ConvTranspose2d>,
    out: ConvTranspose2d,
}

impl ConvDecoder {
    /// Will create a decoder with these variables:
    ///
    /// * `fc.weight` latent -> c x h x w
    /// * `up.{}.weight` where {} is the stage index
    /// * `out.weight` single-channel output
    ///
    /// # Arguments
    /// * `n_latent` - width of the decoder input
    /// * `input_type` - target grid of the reconstruction
    /// * `up_strides` - stride of each hidden transposed convolution
    /// * `vs` - variable builder
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
                    CONV_CHANNELS,
                    CONV_CHANNELS,
                    CONV_KERNEL,
                    stride,
                    vs.pp(format!("up.{}", j)),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let out = same_conv_transpose2d(CONV_CHANNELS, 1, CONV_KERNEL, 1, vs.pp("out"))?;

        Ok(Self {
            n_latent,
            grid,
            fc,
            ups,
            out,
        })
    }

    pub fn num_up_stages(&self) -> usize {
        self.ups.len()
    }

    pub fn encoded_grid(&self) -> (usize, usize) {
        self.grid
    }

    /// Decode and keep every activation
    ///
    /// * `z_nk` - latent states (n x k)
    pub fn forward_stages(&self, z_nk: &Tensor) -> Result<DecoderStages> {
        let (h, w) = self.grid;
        let n = z_nk.dim(0)?;
        let grid = self
            .fc
            .forward(z_nk)?
            .relu()?
            .reshape((n, CONV_CHANNELS, h, w))?;

        let mut x = grid.clone();
        let mut ups = Vec::with_capacity(self.ups.len());
        for layer in self.ups.iter() {
            x = layer.forward(&x)?.relu()?;
            ups.push(x.clone());
        }

        let recon = to_channels_last(&self.out.forward(&x)?.tanh()?)?;
        Ok(DecoderStages { grid, ups, recon })
    }
}

impl DecoderModuleT for ConvDecoder {
    fn forward(&self, z_nk: &Tensor, label_nc: Option<&Tensor>) -> Result<Tensor> {
        if label_nc.is_some() {
            candle_core::bail!("unconditional decoder does not take labels");
        }
        Ok(self.forward_stages(z_nk)?.recon)
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

///////////////////////////////
// Label-conditioned decoder //
///////////////////////////////

pub struct LabelConditionedDecoder {
    n_latent: usize,
    n_class: usize,
    label_fc: Linear,
    joint_fc: Linear,
    body: ConvDecoder,
}

impl LabelConditionedDecoder {
    /// * `label.weight` label -> latent width
    /// * `joint.weight` [label, z] -> latent width
    /// * `body.*` see `ConvDecoder::new`
    pub fn new(
        n_latent: usize,
        n_class: usize,
        input_type: InputType,
        up_strides: &[usize],
        vs: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            n_latent,
            n_class,
            label_fc: candle_nn::linear(n_class, n_latent, vs.pp("label"))?,
            joint_fc: candle_nn::linear(2 * n_latent, n_latent, vs.pp("joint"))?,
            body: ConvDecoder::new(n_latent, input_type, up_strides, vs.pp("body"))?,
        })
    }

    pub fn n_class(&self) -> usize {
        self.n_class
    }

    /// * `z_nk` - latent states (n x k)
    /// * `label_nc` - one-hot or soft labels (n x c)
    pub fn forward_conditioned(&self, z_nk: &Tensor, label_nc: &Tensor) -> Result<Tensor> {
        if label_nc.dim(1)? != self.n_class {
            candle_core::bail!(
                "expected {} label columns, got {:?}",
                self.n_class,
                label_nc.dims()
            );
        }
        let l_nk = self.label_fc.forward(label_nc)?.relu()?;
        let h_nk = self
            .joint_fc
            .forward(&Tensor::cat(&[&l_nk, z_nk], 1)?)?
            .relu()?;
        Ok(self.body.forward_stages(&h_nk)?.recon)
    }
}

impl DecoderModuleT for LabelConditionedDecoder {
    fn forward(&self, z_nk: &Tensor, label_nc: Option<&Tensor>) -> Result<Tensor> {
        match label_nc {
            Some(label_nc) => self.forward_conditioned(z_nk, label_nc),
            None => candle_core::bail!("label-conditioned decoder needs labels"),
        }
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn decoder_output_bounded() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let dec = ConvDecoder::new(2, InputType::Feat, &[1, 2], vb)?;

        let z = (Tensor::randn(0f32, 1f32, (8, 2), &dev)? * 50.)?;
        let stages = dec.forward_stages(&z)?;
        assert_eq!(stages.grid.dims(), &[8, 32, 3, 2]);
        assert_eq!(stages.ups[0].dims(), &[8, 32, 3, 2]);
        assert_eq!(stages.ups[1].dims(), &[8, 32, 6, 4]);
        assert_eq!(stages.recon.dims(), &[8, 6, 4, 1]);

        let values = stages.recon.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
        Ok(())
    }

    #[test]
    fn conditioned_decoder_requires_labels() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let dec = LabelConditionedDecoder::new(3, 4, InputType::Raw, &[2], vb)?;

        let z = Tensor::randn(0f32, 1f32, (2, 3), &dev)?;
        let y = Tensor::new(&[[0f32, 1., 0., 0.], [0., 0., 0., 1.]], &dev)?;
        assert_eq!(dec.forward(&z, Some(&y))?.dims(), &[2, 6, 100, 1]);
        assert!(dec.forward(&z, None).is_err());

        let wrong = Tensor::new(&[[0f32, 1.], [1., 0.]], &dev)?;
        assert!(dec.forward(&z, Some(&wrong)).is_err());
        Ok(())
    }
}
