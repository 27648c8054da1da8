pub mod candle_arch_config;
pub mod candle_aux_layers;
pub mod candle_classifier;
pub mod candle_composite_model;
pub mod candle_data_loader;
pub mod candle_decoder_conv;
pub mod candle_encoder_conv;
pub mod candle_encoder_dense;
pub mod candle_evaluation;
pub mod candle_inference;
pub mod candle_latent_gaussian;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_parameter_set;
pub mod candle_progressive_model;

pub use candle_arch_config::{ArchConfig, InputType};
pub use candle_composite_model::{
    build_cnn, build_sae, build_svae, build_vae, build_vae_s, build_vcnn, CompositeModel,
};
pub use candle_evaluation::{evaluate, evaluate_two_stage, reconstruct};
pub use candle_inference::{fit, train_step, TrainConfig};
pub use candle_model_traits::{CompositeModuleT, CompositeOutput, OutputKind};
pub use candle_parameter_set::ParameterSet;
pub use candle_progressive_model::{build_pnn, ProgressiveModel};

pub use candle_core;
pub use candle_nn;
