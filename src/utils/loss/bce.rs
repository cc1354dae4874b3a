use burn::prelude::*;

/// Configuration to create a [Binary Cross-entropy loss](BinaryCrossEntropyLoss) using the [init function](BinaryCrossEntropyLossConfig::init).
#[derive(Config, Debug, PartialEq)]
pub struct BinaryCrossEntropyLossConfig {
    /// Lower bound of `log(p)`, keeps the loss finite for saturated outputs.
    #[config(default = "-100.0")]
    pub log_floor: f64,
}

impl BinaryCrossEntropyLossConfig {
    /// Initialize [Binary Cross-entropy loss](BinaryCrossEntropyLoss).
    pub fn init(&self) -> BinaryCrossEntropyLoss {
        BinaryCrossEntropyLoss {
            log_floor: self.log_floor,
        }
    }
}

/// Binary cross entropy between output probabilities and one-hot targets,
/// averaged over the output units and weighted per event.
///
/// Should be created using [BinaryCrossEntropyLossConfig]
#[derive(Clone, Debug)]
pub struct BinaryCrossEntropyLoss {
    pub log_floor: f64,
}

impl BinaryCrossEntropyLoss {
    /// Per-event loss, the mean over the output units.
    ///
    /// # Shapes
    /// - probs: `[batch_size, num_classes]`
    /// - targets: `[batch_size, num_classes]`
    /// - output: `[batch_size]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        probs: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        // - (target * log(input) + (1 - target) * log(1 - input))
        // https://github.com/tracel-ai/burn/issues/2739: clamp to avoid undefined values
        let loss = (targets.clone() - 1) * probs.clone().neg().log1p().clamp_min(self.log_floor)
            - targets * probs.log().clamp_min(self.log_floor);
        loss.mean_dim(1).squeeze_dim(1)
    }

    /// Weighted loss over the batch: `sum(w_i * l_i) / batch_size`.
    ///
    /// # Shapes
    /// - probs: `[batch_size, num_classes]`
    /// - targets: `[batch_size, num_classes]`
    /// - weights: `[batch_size]`
    pub fn forward<B: Backend>(
        &self,
        probs: Tensor<B, 2>,
        targets: Tensor<B, 2>,
        weights: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        let [batch_size, _] = probs.dims();
        let loss = self.forward_no_reduction(probs, targets);
        (loss * weights).sum() / batch_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn matches_the_closed_form() {
        let device = Default::default();
        let probs = Tensor::<B, 2>::from_data([[0.8, 0.2], [0.4, 0.6]], &device);
        let targets = Tensor::<B, 2>::from_data([[1.0, 0.0], [0.0, 1.0]], &device);
        let weights = Tensor::<B, 1>::from_data([1.0, 1.0], &device);

        let loss = BinaryCrossEntropyLossConfig::new()
            .init()
            .forward(probs, targets, weights);
        let loss: f32 = loss.into_scalar().elem();

        let expected = (-(0.8f32.ln()) - 0.6f32.ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} != {expected}");
    }

    #[test]
    fn weights_scale_each_event() {
        let device = Default::default();
        let probs = Tensor::<B, 2>::from_data([[0.5, 0.5], [0.9, 0.1]], &device);
        let targets = Tensor::<B, 2>::from_data([[1.0, 0.0], [1.0, 0.0]], &device);
        let loss = BinaryCrossEntropyLossConfig::new().init();

        let zero_second = loss
            .forward(
                probs.clone(),
                targets.clone(),
                Tensor::from_data([2.0, 0.0], &device),
            )
            .into_scalar()
            .elem::<f32>();
        let first_only = loss
            .forward_no_reduction(probs, targets)
            .slice([0..1])
            .into_scalar()
            .elem::<f32>();
        assert!((zero_second - first_only).abs() < 1e-5);
    }

    #[test]
    fn saturated_outputs_stay_finite() {
        let device = Default::default();
        let probs = Tensor::<B, 2>::from_data([[0.0, 1.0]], &device);
        let targets = Tensor::<B, 2>::from_data([[1.0, 0.0]], &device);
        let loss = BinaryCrossEntropyLossConfig::new()
            .init()
            .forward(probs, targets, Tensor::from_data([1.0], &device))
            .into_scalar()
            .elem::<f32>();
        assert!(loss.is_finite());
        assert!((loss - 100.0).abs() < 1e-3);
    }
}
