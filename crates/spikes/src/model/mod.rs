//! Model components: the 1D U-Net and the tensor bridge between host rows
//! and burn tensors.

pub mod bridge;
pub mod unet;

pub use unet::{KernelInit, UNet1d, UNet1dConfig};
