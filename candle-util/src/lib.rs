pub mod candle_kernels;
pub mod candle_loss_functions;
pub mod candle_sampling;

pub use candle_core;
