use candle_core::{Result, Tensor};

/// Reconstruction and KL terms are summed and divided by this
/// constant before averaging over the batch.
pub const RECON_KL_NORMALIZER: f64 = 100.0;

/// Probabilities are clipped to `[eps, 1 - eps]` in cross-entropy
pub const CROSS_ENTROPY_EPS: f64 = 1e-7;

/// KL divergence loss between two Gaussian distributions
///
/// -0.5 * (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
/// Returns one value per example (summed over the last axis).
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Mean squared error over every element, times the input grid area
///
/// area * mean_{n,h,w,c} [ x - xhat ]^2
///
/// * `x` - observed input
/// * `recon` - reconstruction of the same shape
/// * `area` - `height * width` of the input grid
///
pub fn scaled_mse_loss(x: &Tensor, recon: &Tensor, area: f64) -> Result<Tensor> {
    x.sub(recon)?.sqr()?.mean_all()? * area
}

/// Categorical cross-entropy of softmax outputs
///
/// ce(i) = - sum_c y(i,c) * log clip(p(i,c))
///
/// * `y_nc` - one-hot (or soft) labels
/// * `prob_nc` - class probabilities
///
pub fn categorical_cross_entropy(y_nc: &Tensor, prob_nc: &Tensor) -> Result<Tensor> {
    let log_p_nc = prob_nc
        .clamp(CROSS_ENTROPY_EPS, 1.0 - CROSS_ENTROPY_EPS)?
        .log()?;
    y_nc.mul(&log_p_nc)?.sum(y_nc.rank() - 1)?.neg()
}

/// VAE objective shared by every reconstructing composite
///
/// mean_n [ (recon + kl(n)) / 100 ]
///
/// * `recon` - scalar reconstruction loss (see `scaled_mse_loss`)
/// * `kl_n` - per-example KL divergence
///
pub fn recon_kl_objective(recon: &Tensor, kl_n: &Tensor) -> Result<Tensor> {
    (kl_n.broadcast_add(recon)? / RECON_KL_NORMALIZER)?.mean_all()
}

/// Classifier-with-KL objective
///
/// mean_n [ (ce(n) + kl(n)) / 100 ]
pub fn class_kl_objective(ce_n: &Tensor, kl_n: &Tensor) -> Result<Tensor> {
    ((ce_n + kl_n)? / RECON_KL_NORMALIZER)?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn kl_vanishes_at_standard_normal() -> Result<()> {
        let zeros = Tensor::zeros((7, 3), candle_core::DType::F32, &Device::Cpu)?;
        let kl = gaussian_kl_loss(&zeros, &zeros)?;
        assert_eq!(kl.dims(), &[7]);
        assert!(kl.to_vec1::<f32>()?.iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn kl_matches_closed_form() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::new(&[[1f32, -2f32]], &dev)?;
        let lnvar = Tensor::new(&[[0.5f32, -1f32]], &dev)?;
        let kl = gaussian_kl_loss(&mean, &lnvar)?.to_vec1::<f32>()?;

        let expected: f32 = [(1f32, 0.5f32), (-2., -1.)]
            .iter()
            .map(|&(m, lv)| -0.5 * (1. + lv - m * m - lv.exp()))
            .sum();
        assert_abs_diff_eq!(kl[0], expected, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn cross_entropy_of_confident_prediction() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[0f32, 1., 0.], [1., 0., 0.]], &dev)?;
        let p = Tensor::new(&[[0.1f32, 0.8, 0.1], [0.25, 0.5, 0.25]], &dev)?;
        let ce = categorical_cross_entropy(&y, &p)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(ce[0], -(0.8f32.ln()), epsilon = 1e-6);
        assert_abs_diff_eq!(ce[1], -(0.25f32.ln()), epsilon = 1e-6);

        // zero probability is clipped, not infinite
        let p0 = Tensor::new(&[[1f32, 0., 0.]], &dev)?;
        let y0 = Tensor::new(&[[0f32, 1., 0.]], &dev)?;
        let ce0 = categorical_cross_entropy(&y0, &p0)?.to_vec1::<f32>()?;
        assert!(ce0[0].is_finite());
        Ok(())
    }

    #[test]
    fn recon_objective_scaling() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::ones((2, 6, 4, 1), candle_core::DType::F32, &dev)?;
        let xhat = Tensor::zeros((2, 6, 4, 1), candle_core::DType::F32, &dev)?;
        let recon = scaled_mse_loss(&x, &xhat, 24.)?;
        assert_abs_diff_eq!(recon.to_scalar::<f32>()?, 24f32, epsilon = 1e-6);

        let kl_n = Tensor::new(&[1f32, 3f32], &dev)?;
        let loss = recon_kl_objective(&recon, &kl_n)?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(loss, (25. + 27.) / 2. / 100., epsilon = 1e-6);
        Ok(())
    }
}
