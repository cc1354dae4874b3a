use burn::{
    nn::{
        Initializer, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

/// Convolution (same padding, stride 1) followed by ReLU and max-pooling.
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub conv: Conv2d<B>,
    pub activation: Relu,
    pub pool: MaxPool2d,
}

#[derive(Config, Debug, PartialEq)]
pub struct ConvStageConfig {
    /// Number of output channels.
    pub filters: usize,
    #[config(default = 2)]
    pub kernel_size: usize,
    /// Pool window, also used as the pool stride.
    #[config(default = 2)]
    pub pool_size: usize,
}

impl ConvStageConfig {
    /// Returns the initialized stage.
    pub fn init<B: Backend>(
        &self,
        in_channels: usize,
        initializer: Initializer,
        device: &B::Device,
    ) -> ConvStage<B> {
        let k = self.kernel_size;
        let p = self.pool_size;
        ConvStage {
            conv: Conv2dConfig::new([in_channels, self.filters], [k, k])
                .with_padding(PaddingConfig2d::Valid)
                .with_bias(true)
                .with_initializer(initializer)
                .init(device),
            activation: Relu::new(),
            pool: MaxPool2dConfig::new([p, p])
                .with_strides([p, p])
                .with_padding(PaddingConfig2d::Valid)
                .init(),
        }
    }

    /// Spatial size after this stage for an input of `[height, width]`.
    pub fn output_size(&self, [height, width]: [usize; 2]) -> [usize; 2] {
        // same-padded convolution keeps the size, valid pooling floors it
        [height / self.pool_size, width / self.pool_size]
    }
}

/// Padding `(left, right, top, bottom)` that keeps a stride-1 convolution's
/// output the size of its input. Odd totals put the extra row/column after.
pub fn same_padding([kernel_h, kernel_w]: [usize; 2]) -> (usize, usize, usize, usize) {
    let (total_h, total_w) = (kernel_h - 1, kernel_w - 1);
    (total_w / 2, total_w - total_w / 2, total_h / 2, total_h - total_h / 2)
}

impl<B: Backend> ConvStage<B> {
    /// # Shapes
    ///   - Input [batch, in_channels, height, width]
    ///   - Output [batch, filters, height / pool, width / pool]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _in_channels, height, width] = x.dims();
        let [filters, _, _, _] = self.conv.weight.dims();

        let padding = same_padding(self.conv.kernel_size);
        let x = if padding == (0, 0, 0, 0) {
            x
        } else {
            x.pad(padding, 0.0)
        };

        let x = self.conv.forward(x);
        debug_assert_eq!([batch, filters, height, width], x.dims());

        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn even_kernel_pads_after() {
        assert_eq!(same_padding([2, 2]), (0, 1, 0, 1));
        assert_eq!(same_padding([3, 3]), (1, 1, 1, 1));
        assert_eq!(same_padding([1, 1]), (0, 0, 0, 0));
    }

    #[test]
    fn stage_keeps_size_until_pooling() {
        let device = Default::default();
        let stage = ConvStageConfig::new(3)
            .with_kernel_size(2)
            .with_pool_size(4)
            .init::<B>(1, Initializer::Normal { mean: 0.0, std: 0.05 }, &device);
        let x = Tensor::<B, 4>::ones([2, 1, 16, 16], &device);
        let y = stage.forward(x);
        assert_eq!([2, 3, 4, 4], y.dims());
    }

    #[test]
    fn relu_output_is_non_negative() {
        let device = Default::default();
        let stage = ConvStageConfig::new(4).init::<B>(
            1,
            Initializer::Normal { mean: 0.0, std: 1.0 },
            &device,
        );
        let x = Tensor::<B, 4>::random(
            [1, 1, 8, 8],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let min: f32 = stage.forward(x).min().into_scalar().elem();
        assert!(min >= 0.0);
    }
}
