use crate::candle_aux_layers::StackLayers;
use candle_core::{Result, Tensor};
use candle_nn::{ops, Linear, Module, VarBuilder};

/// Softmax classifier on a latent (or trunk) representation
pub struct ClassifierHead {
    n_input: usize,
    n_class: usize,
    fc: StackLayers<Linear>,
}

impl ClassifierHead {
    /// Will create a classifier with these variables:
    ///
    /// * `fc.{}.weight` where {} is the layer index; every layer but
    ///   the last is followed by relu, the last by softmax
    ///
    /// # Arguments
    /// * `n_input` - width of the representation
    /// * `hidden` - hidden layer widths (empty for a linear classifier)
    /// * `n_class` - number of categories
    /// * `vs` - variable builder
    pub fn new(n_input: usize, hidden: &[usize], n_class: usize, vs: VarBuilder) -> Result<Self> {
        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = n_input;
        for (j, &next_dim) in hidden.iter().enumerate() {
            fc.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vs.pp(format!("fc.{}", j)))?,
                candle_nn::Activation::Relu,
            );
            prev_dim = next_dim;
        }
        fc.push(candle_nn::linear(
            prev_dim,
            n_class,
            vs.pp(format!("fc.{}", hidden.len())),
        )?);

        Ok(Self {
            n_input,
            n_class,
            fc,
        })
    }

    pub fn dim_input(&self) -> usize {
        self.n_input
    }

    pub fn num_class(&self) -> usize {
        self.n_class
    }

    /// unnormalized class scores (n x c)
    pub fn logits(&self, h_nk: &Tensor) -> Result<Tensor> {
        self.fc.forward(h_nk)
    }
}

impl Module for ClassifierHead {
    /// class probabilities (n x c), rows sum to one
    fn forward(&self, h_nk: &Tensor) -> Result<Tensor> {
        ops::softmax(&self.logits(h_nk)?, 1)
    }
}
