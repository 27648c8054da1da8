use crate::candle_arch_config::{InputType, DENSE_LAYERS};
use crate::candle_aux_layers::StackLayers;
use crate::candle_latent_gaussian::LatentCode;
use crate::candle_model_traits::EncoderModuleT;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Deterministic encoder for flattened feature vectors
pub struct DenseEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    z: Linear,
}

impl DenseEncoder {
    /// Will create a dense encoder with these variables:
    ///
    /// * `fc.{}.weight` where {} is the layer index
    /// * `z.weight`
    ///
    /// # Arguments
    /// * `n_features` - input dimension
    /// * `n_latent` - latent dimension
    /// * `layers` - fully connected layers, each with the dim
    /// * `vs` - variable builder
    pub fn new(
        n_features: usize,
        n_latent: usize,
        layers: &[usize],
        vs: VarBuilder,
    ) -> Result<Self> {
        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = n_features;
        for (j, &next_dim) in layers.iter().enumerate() {
            let _name = format!("fc.{}", j);
            fc.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vs.pp(_name))?,
                candle_nn::Activation::Relu,
            );
            prev_dim = next_dim;
        }

        let z = candle_nn::linear(prev_dim, n_latent, vs.pp("z"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z,
        })
    }

    /// 24 -> 12 -> 8 -> k on a flattened `input_type` grid
    pub fn for_input(input_type: InputType, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        Self::new(input_type.flat_dim(), n_latent, &DENSE_LAYERS, vs)
    }

    pub fn dim_obs(&self) -> usize {
        self.n_features
    }
}

impl EncoderModuleT for DenseEncoder {
    /// Accepts `(n, d)` or any `(n, ...)` tensor with `d` trailing elements
    fn forward(&self, x: &Tensor) -> Result<LatentCode> {
        let x_nd = x.flatten_from(1)?;
        let d = x_nd.dim(1)?;
        if d != self.n_features {
            candle_core::bail!("expected {} input features, got {}", self.n_features, d);
        }
        let h_nh = self.fc.forward(&x_nd)?;
        let z_nk = self.z.forward(&h_nh)?;
        Ok(LatentCode::deterministic(z_nk, h_nh))
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
    fn flat_and_grid_inputs_agree() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = DenseEncoder::for_input(InputType::Feat, 4, vb)?;

        let x_nd = Tensor::randn(0f32, 1f32, (5, 24), &dev)?;
        let x_grid = x_nd.reshape((5, 6, 4, 1))?;

        let a = enc.forward(&x_nd)?;
        let b = enc.forward(&x_grid)?;
        assert_eq!(a.z_nk.dims(), &[5, 4]);
        assert_eq!(a.hidden_nh.dims(), &[5, 8]);
        assert_eq!(a.z_nk.to_vec2::<f32>()?, b.z_nk.to_vec2::<f32>()?);
        assert!(a.gaussian.is_none());

        let bad = Tensor::zeros((5, 600), DType::F32, &dev)?;
        assert!(enc.forward(&bad).is_err());
        Ok(())
    }
}
