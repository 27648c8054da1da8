use crate::candle_data_loader::*;
use crate::candle_model_traits::CompositeModuleT;

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub device: Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 32,
            num_epochs: 10,
            device: Device::Cpu,
            verbose: false,
            show_progress: false,
        }
    }
}

/// Adam optimizer over the model's trainable variables only
pub fn new_optimizer<M>(model: &M, train_config: &TrainConfig) -> anyhow::Result<AdamW>
where
    M: CompositeModuleT,
{
    let vars = model.trainable_vars();
    anyhow::ensure!(!vars.is_empty(), "the model has no trainable variables");
    Ok(AdamW::new_lr(vars, train_config.learning_rate.into())?)
}

/// One gradient step on a minibatch; returns the objective before
/// the update
///
/// * `adam` - optimizer built by `new_optimizer`
/// * `model` - composite model
/// * `x` - minibatch input
/// * `y_nc` - one-hot labels if the model has a class head
pub fn train_step<M>(
    adam: &mut AdamW,
    model: &M,
    x: &Tensor,
    y_nc: Option<&Tensor>,
) -> anyhow::Result<f32>
where
    M: CompositeModuleT,
{
    let loss = model.loss(x, y_nc)?;
    adam.backward_step(&loss.total)?;
    Ok(loss.total.to_scalar::<f32>()?)
}

/// Train the composite model on in-memory data
///
/// * `model` - composite model
/// * `x` - input data, one example per row of the first axis
/// * `y_nc` - one-hot labels if the model has a class head
/// * `train_config` - training configuration
///
/// Returns the average objective of each epoch.
pub fn fit<M>(
    model: &M,
    x: &Tensor,
    y_nc: Option<&Tensor>,
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    M: CompositeModuleT,
{
    let device = &train_config.device;
    let mut adam = new_optimizer(model, train_config)?;

    let mut data = match y_nc {
        Some(y_nc) => InMemoryData::new_with_output(x, y_nc)?,
        None => InMemoryData::new(x)?,
    };

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = vec![];

    for epoch in 0..train_config.num_epochs {
        data.shuffle_minibatch(train_config.batch_size)?;

        let mut loss_tot = 0f32;
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, device)?;
            loss_tot += train_step(&mut adam, model, &mb.input, mb.output.as_ref())?;
        }
        loss_trace.push(loss_tot / data.num_minibatch() as f32);
        pb.inc(1);

        if train_config.verbose {
            info!(
                "[{}] loss: {}",
                epoch + 1,
                loss_trace.last().ok_or(anyhow::anyhow!("loss"))?
            );
        }
    } // each epoch

    pb.finish_and_clear();
    Ok(loss_trace)
}
