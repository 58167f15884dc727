use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::pool::{MaxPool1d, MaxPool1dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, PaddingConfig1d};
use burn::prelude::*;
use burn::tensor::activation::{relu, softmax};

/// Number of 2x poolings on the way down; window lengths must be
/// divisible by `2^DEPTH`.
pub const DEPTH: u32 = 4;

/// Kernel width of every hidden convolution.
const KERNEL: usize = 5;

/// Weight initialization for the convolution kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelInit {
    HeNormal,
    HeUniform,
    GlorotUniform,
}

impl KernelInit {
    fn initializer(self) -> Initializer {
        let he_gain = std::f64::consts::SQRT_2;
        match self {
            KernelInit::HeNormal => Initializer::KaimingNormal {
                gain: he_gain,
                fan_out_only: false,
            },
            KernelInit::HeUniform => Initializer::KaimingUniform {
                gain: he_gain,
                fan_out_only: false,
            },
            KernelInit::GlorotUniform => Initializer::XavierUniform { gain: 1.0 },
        }
    }
}

impl std::fmt::Display for KernelInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelInit::HeNormal => write!(f, "he_normal"),
            KernelInit::HeUniform => write!(f, "he_uniform"),
            KernelInit::GlorotUniform => write!(f, "glorot_uniform"),
        }
    }
}

impl std::str::FromStr for KernelInit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "he_normal" => Ok(KernelInit::HeNormal),
            "he_uniform" => Ok(KernelInit::HeUniform),
            "glorot_uniform" => Ok(KernelInit::GlorotUniform),
            other => Err(format!("unknown kernel initializer `{other}`")),
        }
    }
}

/// Configuration for the 1D U-Net.
///
/// ```text
/// (batch, len)
///   → expand to 1 channel
///   → 4 x [ 2 x (Conv1d k=5 → BatchNorm → ReLU) → MaxPool 2 ]   filters: f, 2f, 4f, 8f
///   → bottleneck 2 x conv block (16f) → upsample 2
///   → 4 x [ concat skip → 2 x conv block → upsample 2 ]           filters: 8f, 4f, 2f, f
///   → Conv1d(f→2, k=1) → MaxPool(2*margin+1, stride 1, same)
///   → softmax over channels → positive channel
///   → (batch, len) probabilities
/// ```
#[derive(Config, Debug)]
pub struct UNet1dConfig {
    /// Input window length in frames.
    pub window_len: usize,
    /// Filters at the first stage, doubled at each stage down.
    #[config(default = 32)]
    pub nb_filters_base: usize,
    #[config(default = "KernelInit::HeNormal")]
    pub kernel_init: KernelInit,
    /// Dropout after the first pooling; doubled deeper in the network.
    #[config(default = 0.05)]
    pub dropout: f64,
    /// Frames of tolerance baked into the output by max-pooling.
    #[config(default = 4)]
    pub margin: usize,
}

/// Conv1d → BatchNorm → ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv1d<B>,
    norm: BatchNorm<B, 1>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(channels_in: usize, channels_out: usize, init: KernelInit, device: &B::Device) -> Self {
        Self {
            conv: Conv1dConfig::new(channels_in, channels_out, KERNEL)
                .with_padding(PaddingConfig1d::Same)
                .with_initializer(init.initializer())
                .init(device),
            norm: BatchNormConfig::new(channels_out).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        relu(self.norm.forward(self.conv.forward(x)))
    }
}

/// Two conv blocks at one resolution.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    first: ConvBlock<B>,
    second: ConvBlock<B>,
}

impl<B: Backend> Stage<B> {
    fn new(channels_in: usize, channels_out: usize, init: KernelInit, device: &B::Device) -> Self {
        Self {
            first: ConvBlock::new(channels_in, channels_out, init, device),
            second: ConvBlock::new(channels_out, channels_out, init, device),
        }
    }

    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.second.forward(self.first.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct UNet1d<B: Backend> {
    down0: Stage<B>,
    down1: Stage<B>,
    down2: Stage<B>,
    down3: Stage<B>,
    bottleneck: Stage<B>,
    up3: Stage<B>,
    up2: Stage<B>,
    up1: Stage<B>,
    up0: Stage<B>,
    head: Conv1d<B>,
    pool: MaxPool1d,
    margin_pool: MaxPool1d,
    dropout: Dropout,
    dropout_deep: Dropout,
}

impl UNet1dConfig {
    /// Initialize a U-Net with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet1d<B> {
        let f = self.nb_filters_base;
        let init = self.kernel_init;
        UNet1d {
            down0: Stage::new(1, f, init, device),
            down1: Stage::new(f, f * 2, init, device),
            down2: Stage::new(f * 2, f * 4, init, device),
            down3: Stage::new(f * 4, f * 8, init, device),
            bottleneck: Stage::new(f * 8, f * 16, init, device),
            up3: Stage::new(f * 16 + f * 8, f * 8, init, device),
            up2: Stage::new(f * 8 + f * 4, f * 4, init, device),
            up1: Stage::new(f * 4 + f * 2, f * 2, init, device),
            up0: Stage::new(f * 2 + f, f, init, device),
            head: Conv1dConfig::new(f, 2, 1)
                .with_initializer(init.initializer())
                .init(device),
            pool: MaxPool1dConfig::new(2).with_stride(2).init(),
            margin_pool: MaxPool1dConfig::new(2 * self.margin + 1)
                .with_stride(1)
                .with_padding(PaddingConfig1d::Explicit(self.margin))
                .init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            dropout_deep: DropoutConfig::new(self.dropout * 2.0).init(),
        }
    }

    /// Check that the window survives four 2x poolings.
    pub fn check_window(&self) -> Result<(), crate::error::TrainError> {
        let multiple = 1usize << DEPTH;
        if self.window_len == 0 || self.window_len % multiple != 0 {
            return Err(crate::error::TrainError::InvalidConfig(format!(
                "window length {} must be a positive multiple of {multiple}",
                self.window_len
            )));
        }
        Ok(())
    }
}

/// Nearest-neighbour 2x upsampling along the time axis.
fn upsample<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, channels, len] = x.dims();
    let x = x.unsqueeze_dim::<4>(3);
    Tensor::cat(vec![x.clone(), x], 3).reshape([batch, channels, len * 2])
}

impl<B: Backend> UNet1d<B> {
    /// Forward pass.
    ///
    /// Input shape: `(batch, len)` with `len` divisible by 16.
    /// Output shape: `(batch, len)`, spike probabilities.
    pub fn forward(&self, traces: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, len] = traces.dims();
        let x = traces.unsqueeze_dim::<3>(1);

        let d0 = self.down0.forward(x);
        let d1 = self.dropout.forward(self.down1.forward(self.pool.forward(d0.clone())));
        let d2 = self
            .dropout_deep
            .forward(self.down2.forward(self.pool.forward(d1.clone())));
        let d3 = self
            .dropout_deep
            .forward(self.down3.forward(self.pool.forward(d2.clone())));

        let x = upsample(self.bottleneck.forward(self.pool.forward(d3.clone())));
        let x = self.dropout_deep.forward(x);

        let x = upsample(self.up3.forward(Tensor::cat(vec![x, d3], 1)));
        let x = self.dropout_deep.forward(x);
        let x = upsample(self.up2.forward(Tensor::cat(vec![x, d2], 1)));
        let x = self.dropout_deep.forward(x);
        let x = upsample(self.up1.forward(Tensor::cat(vec![x, d1], 1)));
        let x = self.dropout.forward(x);
        let x = self.up0.forward(Tensor::cat(vec![x, d0], 1));

        let logits = self.margin_pool.forward(self.head.forward(x));
        softmax(logits, 1)
            .slice([0..batch, 1..2, 0..len])
            .reshape([batch, len])
    }
}
