use crate::candle_loss_functions::gaussian_kl_loss;
use candle_core::{Result, Tensor};

///
/// z = mu + sigma * eps
/// where eps ~ N(0, 1)
///
/// Noise is drawn on every call with the batch and latent shape of
/// `z_mean`, so gradients reach `z_mean` and `z_lnvar` but not `eps`.
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution (n x k)
/// * `z_lnvar` - log variance of Gaussian distribution (n x k)
pub fn reparameterize(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let eps = Tensor::randn_like(z_mean, 0., 1.)?;
    z_mean + (z_lnvar * 0.5)?.exp()?.mul(&eps)?
}

/// Per-example Gaussian q(z|x) = N(mean, exp(lnvar))
#[derive(Clone, Debug)]
pub struct GaussianParams {
    pub z_mean_nk: Tensor,
    pub z_lnvar_nk: Tensor,
}

impl GaussianParams {
    pub fn new(z_mean_nk: Tensor, z_lnvar_nk: Tensor) -> Result<Self> {
        if z_mean_nk.dims() != z_lnvar_nk.dims() {
            candle_core::bail!(
                "latent mean {:?} and log-variance {:?} differ in shape",
                z_mean_nk.dims(),
                z_lnvar_nk.dims()
            );
        }
        Ok(Self {
            z_mean_nk,
            z_lnvar_nk,
        })
    }

    /// draw one latent sample from this pair
    pub fn sample(&self) -> Result<Tensor> {
        reparameterize(&self.z_mean_nk, &self.z_lnvar_nk)
    }

    /// KL(q || N(0, I)) for each example
    pub fn kl_loss(&self) -> Result<Tensor> {
        gaussian_kl_loss(&self.z_mean_nk, &self.z_lnvar_nk)
    }
}

/// Output of an encoder
///
/// * `z_nk` - latent code used by every downstream head
/// * `gaussian` - the distribution `z_nk` was sampled from, if any
/// * `hidden_nh` - last trunk activation feeding the latent head
#[derive(Clone, Debug)]
pub struct LatentCode {
    pub z_nk: Tensor,
    pub gaussian: Option<GaussianParams>,
    pub hidden_nh: Tensor,
}

impl LatentCode {
    /// sample `z` from freshly computed Gaussian parameters
    pub fn sampled(gaussian: GaussianParams, hidden_nh: Tensor) -> Result<Self> {
        let z_nk = gaussian.sample()?;
        Ok(Self {
            z_nk,
            gaussian: Some(gaussian),
            hidden_nh,
        })
    }

    pub fn deterministic(z_nk: Tensor, hidden_nh: Tensor) -> Self {
        Self {
            z_nk,
            gaussian: None,
            hidden_nh,
        }
    }

    pub fn kl_loss(&self) -> Result<Option<Tensor>> {
        self.gaussian.as_ref().map(|g| g.kl_loss()).transpose()
    }

    /// latent mean if probabilistic, else the code itself
    pub fn mean(&self) -> &Tensor {
        match &self.gaussian {
            Some(g) => &g.z_mean_nk,
            None => &self.z_nk,
        }
    }
}
