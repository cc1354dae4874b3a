use crate::cnn::stage::{ConvStage, ConvStageConfig};
use crate::error::{self, Error};
use burn::{
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};

/// Side length of the calorimeter xy-projection images.
pub const IMAGE_SIDE: usize = 128;
/// Length of one flattened calorimeter image.
pub const IMAGE_LEN: usize = IMAGE_SIDE * IMAGE_SIDE;

/// Sequential image classifier: flat input, reshaped to a grid, a stack of
/// [`ConvStage`]s, flattened into a dense softmax head.
#[derive(Module, Debug)]
pub struct CaloCnn<B: Backend> {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub stages: Vec<ConvStage<B>>,
    pub output: Linear<B>,
}

#[derive(Config, Debug, PartialEq)]
pub struct CaloCnnConfig {
    #[config(default = 128)]
    pub height: usize,
    #[config(default = 128)]
    pub width: usize,
    #[config(default = 1)]
    pub channels: usize,
    pub stages: Vec<ConvStageConfig>,
    #[config(default = 2)]
    pub n_classes: usize,
    /// Standard deviation of the normal kernel initializer.
    #[config(default = 0.05)]
    pub init_std: f64,
}

impl CaloCnnConfig {
    /// The 128x128 single-channel topology used for the calorimeter data.
    ///
    /// Spatial size goes 128 → 64 → 16 → 4 → 1, leaving 64 features for the
    /// 2-unit softmax output.
    pub fn calorimeter() -> Self {
        Self::new(vec![
            ConvStageConfig::new(64).with_pool_size(2),
            ConvStageConfig::new(32).with_pool_size(4),
            ConvStageConfig::new(128).with_pool_size(4),
            ConvStageConfig::new(64).with_pool_size(4),
        ])
        .with_height(IMAGE_SIDE)
        .with_width(IMAGE_SIDE)
    }

    pub fn input_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// `[channels, height, width]` of the last stage's output.
    pub fn feature_shape(&self) -> [usize; 3] {
        let mut size = [self.height, self.width];
        let mut channels = self.channels;
        for stage in &self.stages {
            size = stage.output_size(size);
            channels = stage.filters;
        }
        [channels, size[0], size[1]]
    }

    /// Length of the flattened features fed to the output layer.
    pub fn feature_len(&self) -> usize {
        self.feature_shape().iter().product()
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> CaloCnn<B> {
        let feature_len = self.feature_len();
        assert!(
            feature_len > 0,
            "the stages reduce a {}x{} image to nothing",
            self.height,
            self.width
        );

        let initializer = Initializer::Normal {
            mean: 0.0,
            std: self.init_std,
        };
        let mut stages = Vec::with_capacity(self.stages.len());
        let mut in_channels = self.channels;
        for stage in &self.stages {
            stages.push(stage.init(in_channels, initializer.clone(), device));
            in_channels = stage.filters;
        }

        CaloCnn {
            height: self.height,
            width: self.width,
            channels: self.channels,
            stages,
            output: LinearConfig::new(feature_len, self.n_classes)
                .with_bias(true)
                .init(device),
        }
    }
}

impl<B: Backend> CaloCnn<B> {
    pub fn input_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Checks that an image of `len` values matches the input layer.
    pub fn check_input(&self, len: usize) -> error::Result<()> {
        let expected = self.input_len();
        if len != expected {
            return Err(Error::InputLength { expected, got: len });
        }
        Ok(())
    }

    /// Class probabilities for a batch of flattened images.
    ///
    /// Panics on a wrong image length, see [`Self::try_forward`].
    ///
    /// # Shapes
    ///   - Input [batch, height * width * channels]
    ///   - Output [batch, n_classes]
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, len] = images.dims();
        assert_eq!(self.input_len(), len, "wrong image length");

        // flat images are laid out row-major as [height, width, channels]
        let mut x = images
            .reshape([batch, self.height, self.width, self.channels])
            .permute([0, 3, 1, 2]);

        for stage in self.stages.iter() {
            x = stage.forward(x);
        }

        let x = x.flatten::<2>(1, 3);
        let x = self.output.forward(x);
        softmax(x, 1)
    }

    /// Same as [`Self::forward`], rejecting images of the wrong length.
    pub fn try_forward(&self, images: Tensor<B, 2>) -> error::Result<Tensor<B, 2>> {
        let [_batch, len] = images.dims();
        self.check_input(len)?;
        Ok(self.forward(images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn tiny_config() -> CaloCnnConfig {
        CaloCnnConfig::new(vec![
            ConvStageConfig::new(4).with_pool_size(2),
            ConvStageConfig::new(2).with_pool_size(2),
        ])
        .with_height(8)
        .with_width(8)
    }

    #[test]
    fn calorimeter_topology() {
        let config = CaloCnnConfig::calorimeter();
        assert_eq!(IMAGE_LEN, config.input_len());
        let filters: Vec<_> = config.stages.iter().map(|s| s.filters).collect();
        assert_eq!(vec![64, 32, 128, 64], filters);
        let pools: Vec<_> = config.stages.iter().map(|s| s.pool_size).collect();
        assert_eq!(vec![2, 4, 4, 4], pools);
        assert_eq!([64, 1, 1], config.feature_shape());
        assert_eq!(2, config.n_classes);
    }

    #[test]
    fn calorimeter_accepts_full_images() {
        let device = Default::default();
        let model = CaloCnnConfig::calorimeter().init::<B>(&device);
        assert_eq!(4, model.num_stages());

        let images = Tensor::<B, 2>::zeros([1, IMAGE_LEN], &device);
        let probs = model.try_forward(images).unwrap();
        assert_eq!([1, 2], probs.dims());
    }

    #[test]
    fn rejects_other_lengths() {
        let device = Default::default();
        let model = CaloCnnConfig::calorimeter().init::<B>(&device);
        assert!(model.check_input(IMAGE_LEN).is_ok());

        let images = Tensor::<B, 2>::zeros([1, IMAGE_LEN - 1], &device);
        match model.try_forward(images) {
            Err(Error::InputLength { expected, got }) => {
                assert_eq!(IMAGE_LEN, expected);
                assert_eq!(IMAGE_LEN - 1, got);
            }
            other => panic!("expected an input length error, got {other:?}"),
        }
    }

    #[test]
    fn outputs_are_probabilities() {
        let device = Default::default();
        let model = tiny_config().init::<B>(&device);
        let images = Tensor::<B, 2>::random(
            [3, 64],
            burn::tensor::Distribution::Uniform(0.0, 5.0),
            &device,
        );
        let probs = model.forward(images);
        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn identical_constants_give_identical_architecture() {
        let device = Default::default();
        let a = CaloCnnConfig::calorimeter();
        let b = CaloCnnConfig::calorimeter();
        assert_eq!(a, b);

        let ma = a.init::<B>(&device);
        let mb = b.init::<B>(&device);
        assert_eq!(ma.num_stages(), mb.num_stages());
        assert_eq!(ma.num_params(), mb.num_params());
        for (sa, sb) in ma.stages.iter().zip(mb.stages.iter()) {
            assert_eq!(sa.conv.weight.dims(), sb.conv.weight.dims());
        }
        assert_eq!(ma.output.weight.dims(), mb.output.weight.dims());
    }

    #[test]
    #[should_panic]
    fn over_pooling_fails() {
        let device = Default::default();
        let config = tiny_config().with_height(2).with_width(2);
        let _ = config.init::<B>(&device);
    }
}
