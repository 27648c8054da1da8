use candle_core::{Result, Tensor};
use candle_nn::{Activation, Conv2d, ConvTranspose2d, Module, VarBuilder};

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////
// "same"-padded convolutions //
////////////////////////////////

/// Output length of a "same"-padded convolution: `ceil(len / stride)`
pub fn same_conv_len(len: usize, stride: usize) -> usize {
    len.div_ceil(stride)
}

/// Convolution with odd `kernel` whose output spatial size is
/// `ceil(input / stride)`, matching `padding="same"`.
///
/// * `in_channels` - channels of the input (n x c x h x w)
/// * `out_channels` - number of filters
/// * `kernel` - odd kernel width
/// * `stride` - stride along both spatial axes
/// * `vb` - variable builder (`weight`, `bias`)
pub fn same_conv2d(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    vb: VarBuilder,
) -> Result<Conv2d> {
    debug_assert!(kernel % 2 == 1);
    let config = candle_nn::Conv2dConfig {
        padding: kernel / 2,
        stride,
        ..Default::default()
    };
    candle_nn::conv2d(in_channels, out_channels, kernel, config, vb)
}

/// Transposed convolution with odd `kernel` whose output spatial size
/// is exactly `input * stride`.
///
/// (in - 1) * s - 2 * (k / 2) + (k - 1) + (s - 1) + 1 = in * s
pub fn same_conv_transpose2d(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    vb: VarBuilder,
) -> Result<ConvTranspose2d> {
    debug_assert!(kernel % 2 == 1);
    debug_assert!(stride >= 1);
    let config = candle_nn::ConvTranspose2dConfig {
        padding: kernel / 2,
        output_padding: stride - 1,
        stride,
        ..Default::default()
    };
    candle_nn::conv_transpose2d(in_channels, out_channels, kernel, config, vb)
}

////////////////////
// layout helpers //
////////////////////

/// (n x h x w x c) -> (n x c x h x w)
pub fn to_channels_first(x_nhwc: &Tensor) -> Result<Tensor> {
    x_nhwc.permute((0, 3, 1, 2))?.contiguous()
}

/// (n x c x h x w) -> (n x h x w x c)
pub fn to_channels_last(x_nchw: &Tensor) -> Result<Tensor> {
    x_nchw.permute((0, 2, 3, 1))?.contiguous()
}

/// Concatenate two activations along the channel axis of
/// `n x c x h x w` tensors, or the feature axis of `n x d` tensors.
/// The frozen activation always comes first.
pub fn concat_features(frozen: &Tensor, trainable: &Tensor) -> Result<Tensor> {
    Tensor::cat(&[frozen, trainable], 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn same_padding_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let x = Tensor::randn(0f32, 1f32, (5, 1, 6, 100), &device)?;
        let conv1 = same_conv2d(1, 8, 3, 1, vb.pp("c1"))?;
        let conv2 = same_conv2d(8, 8, 3, 2, vb.pp("c2"))?;
        let h = conv2.forward(&conv1.forward(&x)?)?;
        assert_eq!(h.dims(), &[5, 8, 3, 50]);

        let up = same_conv_transpose2d(8, 4, 3, 2, vb.pp("u1"))?;
        let keep = same_conv_transpose2d(4, 1, 3, 1, vb.pp("u2"))?;
        let y = keep.forward(&up.forward(&h)?)?;
        assert_eq!(y.dims(), &[5, 1, 6, 100]);

        assert_eq!(same_conv_len(6, 2), 3);
        assert_eq!(same_conv_len(5, 2), 3);
        Ok(())
    }

    #[test]
    fn layout_round_trip() -> Result<()> {
        let x = Tensor::arange(0f32, 48f32, &Device::Cpu)?.reshape((2, 6, 4, 1))?;
        let back = to_channels_last(&to_channels_first(&x)?)?;
        assert_eq!(back.dims(), &[2, 6, 4, 1]);
        assert_eq!(
            back.flatten_all()?.to_vec1::<f32>()?,
            x.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }
}
