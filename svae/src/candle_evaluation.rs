use crate::candle_classifier::ClassifierHead;
use crate::candle_encoder_conv::TwoStageEncoder;
use crate::candle_model_traits::*;

use candle_core::Tensor;
use candle_nn::Module;
use log::info;

/// Predicted class of each example and the fraction that agrees
/// with the one-hot labels
///
/// * `model` - composite with a class head
/// * `x` - test input
/// * `y_nc` - one-hot test labels
pub fn evaluate<M>(model: &M, x: &Tensor, y_nc: &Tensor) -> anyhow::Result<(Vec<u32>, f64)>
where
    M: CompositeModuleT,
{
    match model.output_kind() {
        OutputKind::Classification | OutputKind::Joint => {}
        OutputKind::Reconstruction => {
            anyhow::bail!("the model has no class head to evaluate")
        }
    }

    let fwd = model.forward(x)?;
    let prob_nc = fwd
        .output
        .class_prob()
        .ok_or(anyhow::anyhow!("class probabilities"))?;

    score(prob_nc, y_nc)
}

/// Reconstruction of the test input in the `(n, h, w, 1)` layout
pub fn reconstruct<M>(model: &M, x: &Tensor) -> anyhow::Result<Tensor>
where
    M: CompositeModuleT,
{
    if model.output_kind() == OutputKind::Classification {
        anyhow::bail!("the model has no reconstruction head");
    }

    let fwd = model.forward(x)?;
    let recon = fwd
        .output
        .recon()
        .ok_or(anyhow::anyhow!("reconstruction"))?;
    Ok(recon.clone())
}

/// Classify with the stage-1 trunk of a two-stage encoder and the
/// classifier that reads it, skipping the latent sampler and decoder
///
/// * `encoder` - two-stage encoder
/// * `classifier` - class head on the trunk's hidden features
/// * `x` - test grids
/// * `y_nc` - one-hot test labels
pub fn evaluate_two_stage(
    encoder: &TwoStageEncoder,
    classifier: &ClassifierHead,
    x: &Tensor,
    y_nc: &Tensor,
) -> anyhow::Result<(Vec<u32>, f64)> {
    let hidden_nh = encoder.trunk().forward(x)?;
    let prob_nc = classifier.forward(&hidden_nh)?;
    score(&prob_nc, y_nc)
}

fn score(prob_nc: &Tensor, y_nc: &Tensor) -> anyhow::Result<(Vec<u32>, f64)> {
    let n = prob_nc.dim(0)?;
    anyhow::ensure!(n > 0, "nothing to evaluate");
    anyhow::ensure!(
        prob_nc.dims() == y_nc.dims(),
        "predictions {:?} vs. labels {:?}",
        prob_nc.dims(),
        y_nc.dims()
    );

    let predicted = prob_nc.argmax(1)?.to_vec1::<u32>()?;
    let truth = y_nc.argmax(1)?.to_vec1::<u32>()?;

    let correct = predicted
        .iter()
        .zip(truth.iter())
        .filter(|(p, t)| p == t)
        .count();
    let accuracy = correct as f64 / n as f64;

    info!("accuracy: {:.4} ({} / {})", accuracy, correct, n);
    Ok((predicted, accuracy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn accuracy_counts_argmax_agreement() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let prob = Tensor::new(&[[0.7f32, 0.2, 0.1], [0.1, 0.1, 0.8], [0.3, 0.6, 0.1]], &dev)?;
        let y = Tensor::new(&[[1f32, 0., 0.], [0., 1., 0.], [0., 1., 0.]], &dev)?;

        let (predicted, accuracy) = score(&prob, &y)?;
        assert_eq!(predicted, vec![0, 2, 1]);
        assert_abs_diff_eq!(accuracy, 2.0 / 3.0, epsilon = 1e-12);

        let wrong = Tensor::new(&[[1f32, 0.], [0., 1.], [0., 1.]], &dev)?;
        assert!(score(&prob, &wrong).is_err());
        Ok(())
    }
}
