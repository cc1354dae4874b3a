use crate::data::{EventClass, ImageEvent};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

#[derive(Clone, Default)]
pub struct EventBatcher {}

#[derive(Clone, Debug)]
pub struct EventBatch<B: Backend> {
    /// Raw pixel values.
    ///
    /// # Shape
    /// [batch_size, n_variables]
    pub images: Tensor<B, 2>,
    /// One-hot class targets, signal first.
    ///
    /// # Shape
    /// [batch_size, 2]
    pub targets: Tensor<B, 2>,
    /// Class indices.
    ///
    /// # Shape
    /// [batch_size]
    pub labels: Tensor<B, 1, Int>,
    /// # Shape
    /// [batch_size]
    pub weights: Tensor<B, 1>,
}

impl<B: Backend> Batcher<B, ImageEvent, EventBatch<B>> for EventBatcher {
    fn batch(&self, items: Vec<ImageEvent>, device: &B::Device) -> EventBatch<B> {
        let batch_size = items.len();
        let n_variables = items.first().map(|e| e.image.len()).unwrap_or(0);
        let n_classes = EventClass::ALL.len();

        let mut images = Vec::with_capacity(batch_size * n_variables);
        let mut targets = vec![0f32; batch_size * n_classes];
        let mut labels = Vec::with_capacity(batch_size);
        let mut weights = Vec::with_capacity(batch_size);
        for (i, item) in items.into_iter().enumerate() {
            debug_assert_eq!(n_variables, item.image.len());
            images.extend(item.image);
            targets[i * n_classes + item.class.index()] = 1.0;
            labels.push(item.class.index() as i64);
            weights.push(item.weight);
        }

        let images = Tensor::<B, 2>::from_data(
            TensorData::new(images, [batch_size, n_variables]).convert::<B::FloatElem>(),
            device,
        );
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(targets, [batch_size, n_classes]).convert::<B::FloatElem>(),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]).convert::<B::IntElem>(),
            device,
        );
        let weights = Tensor::<B, 1>::from_data(
            TensorData::new(weights, [batch_size]).convert::<B::FloatElem>(),
            device,
        );

        EventBatch {
            images,
            targets,
            labels,
            weights,
        }
    }
}
