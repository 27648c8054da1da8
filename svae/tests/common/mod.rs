#![allow(dead_code)]

use svae::candle_core::{Device, Tensor};
use svae::InputType;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// uniform grids in [-1, 1] shaped like the model input
pub fn random_grid(n: usize, input_type: InputType, dev: &Device) -> anyhow::Result<Tensor> {
    let (h, w) = input_type.grid_shape();
    Ok(Tensor::rand(-1f32, 1f32, (n, h, w, 1), dev)?)
}

/// one-hot rows for labels cycling through `0..n_class`
pub fn cyclic_one_hot(n: usize, n_class: usize, dev: &Device) -> anyhow::Result<Tensor> {
    let mut y = vec![0f32; n * n_class];
    for i in 0..n {
        y[i * n_class + i % n_class] = 1.0;
    }
    Ok(Tensor::from_vec(y, (n, n_class), dev)?)
}

pub fn scalar(t: &Tensor) -> anyhow::Result<f32> {
    Ok(t.to_scalar::<f32>()?)
}
