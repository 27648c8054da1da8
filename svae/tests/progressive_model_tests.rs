mod common;

use common::*;
use svae::candle_composite_model::LatentEncoder;
use svae::candle_core::{Device, Tensor};
use svae::candle_encoder_conv::EncoderStages;
use svae::candle_inference::new_optimizer;
use svae::*;

fn source_stages(source: &CompositeModel, x: &Tensor) -> anyhow::Result<EncoderStages> {
    match source.encoder() {
        LatentEncoder::GaussianConv(enc) => Ok(enc.forward_stages(x)?),
        _ => anyhow::bail!("expected a Gaussian conv encoder"),
    }
}

fn assert_same_stages(a: &EncoderStages, b: &EncoderStages) -> anyhow::Result<()> {
    assert_eq!(
        a.gaussian.z_mean_nk.to_vec2::<f32>()?,
        b.gaussian.z_mean_nk.to_vec2::<f32>()?
    );
    assert_eq!(
        a.gaussian.z_lnvar_nk.to_vec2::<f32>()?,
        b.gaussian.z_lnvar_nk.to_vec2::<f32>()?
    );
    assert_eq!(
        a.trunk.hidden.to_vec2::<f32>()?,
        b.trunk.hidden.to_vec2::<f32>()?
    );
    assert_eq!(a.trunk.flat.to_vec2::<f32>()?, b.trunk.flat.to_vec2::<f32>()?);
    Ok(())
}

#[test]
fn trainable_set_excludes_source() -> anyhow::Result<()> {
    init_logger();
    let dev = Device::Cpu;
    let source = build_svae(2, 3, InputType::Feat, &dev)?;
    let snapshot = source.parameter_set()?;

    let pnn = build_pnn(&snapshot, source.config().clone(), &dev)?;
    let target = ParameterSet::from_var_map(pnn.variable_map())?;

    assert!(!target.is_empty());
    assert_eq!(target.len(), pnn.trainable_vars().len());
    assert!(target
        .names()
        .all(|name| name.starts_with("target.") && !snapshot.contains(name)));
    assert_eq!(pnn.source().num_parameters(), 0);
    assert_eq!(pnn.output_kind(), OutputKind::Joint);
    Ok(())
}

#[test]
fn frozen_path_reproduces_source_encoder() -> anyhow::Result<()> {
    init_logger();
    let dev = Device::Cpu;
    for input_type in [InputType::Feat, InputType::Raw] {
        let source = build_svae(2, 3, input_type, &dev)?;
        let pnn = build_pnn(&source.parameter_set()?, source.config().clone(), &dev)?;

        let x = random_grid(4, input_type, &dev)?;
        assert_same_stages(&pnn.frozen_encoder_stages(&x)?, &source_stages(&source, &x)?)?;
    }
    Ok(())
}

#[test]
fn training_leaves_frozen_path_unchanged() -> anyhow::Result<()> {
    init_logger();
    let dev = Device::Cpu;
    let input_type = InputType::Feat;
    let source = build_svae(2, 3, input_type, &dev)?;
    let pnn = build_pnn(&source.parameter_set()?, source.config().clone(), &dev)?;

    let x = random_grid(8, input_type, &dev)?;
    let y = cyclic_one_hot(8, 3, &dev)?;
    let before = pnn.frozen_encoder_stages(&x)?;

    let config = TrainConfig {
        batch_size: 4,
        num_epochs: 2,
        ..TrainConfig::default()
    };
    let mut adam = new_optimizer(&pnn, &config)?;
    let loss = train_step(&mut adam, &pnn, &x, Some(&y))?;
    assert!(loss.is_finite());

    let trace = fit(&pnn, &x, Some(&y), &config)?;
    assert_eq!(trace.len(), 2);

    let after = pnn.frozen_encoder_stages(&x)?;
    assert_same_stages(&before, &after)?;
    assert_same_stages(&after, &source_stages(&source, &x)?)?;
    Ok(())
}

#[test]
fn target_loss_has_every_term() -> anyhow::Result<()> {
    init_logger();
    let dev = Device::Cpu;
    let input_type = InputType::Raw;
    let source = build_svae(3, 2, input_type, &dev)?;
    let pnn = build_pnn(&source.parameter_set()?, source.config().clone(), &dev)?;

    let x = random_grid(3, input_type, &dev)?;
    let y = cyclic_one_hot(3, 2, &dev)?;

    let latent = pnn.encode(&x)?;
    assert_eq!(latent.z_nk.dims(), &[3, 3]);
    assert!(latent.gaussian.is_some());
    assert_eq!(pnn.decode(&latent.z_nk)?.dims(), &[3, 6, 100, 1]);

    let terms = pnn.loss(&x, Some(&y))?;
    assert!(terms.reconstruction.is_some());
    assert!(terms.kl.is_some());
    assert!(terms.classification.is_some());
    assert!(scalar(&terms.total)?.is_finite());
    assert!(pnn.loss(&x, None).is_err());

    let (predicted, accuracy) = evaluate(&pnn, &x, &y)?;
    assert_eq!(predicted.len(), 3);
    assert!((0.0..=1.0).contains(&accuracy));
    assert_eq!(reconstruct(&pnn, &x)?.dims(), &[3, 6, 100, 1]);
    Ok(())
}

#[test]
fn mismatched_source_is_rejected() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let input_type = InputType::Feat;

    // only supervised VAEs can be extended
    let vcnn = build_vcnn(2, 3, input_type, &dev)?;
    assert!(build_pnn(&vcnn.parameter_set()?, vcnn.config().clone(), &dev).is_err());

    // a snapshot without classifier weights
    let vae = build_vae(2, input_type, &dev)?;
    let svae_config = ArchConfig::svae(2, 3, input_type);
    assert!(build_pnn(&vae.parameter_set()?, svae_config, &dev).is_err());

    // same names, different shapes
    let svae = build_svae(2, 3, input_type, &dev)?;
    let wider = ArchConfig::svae(5, 3, input_type);
    assert!(build_pnn(&svae.parameter_set()?, wider, &dev).is_err());
    Ok(())
}
