use crate::artifact::{CaloOptimizer, ModelArtifact};
use crate::cnn::CaloCnn;
use crate::data::{EventBatch, EventBatcher, EventClass, ImageEvent};
use crate::error::{self, Error};
use crate::utils::loss::BinaryCrossEntropyLoss;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::InMemDataset;
use burn::prelude::*;
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
    train::ClassificationOutput,
    train::metric::{Adaptor, Metric, MetricMetadata, Numeric},
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Hyperparameters of the booked CNN method.
#[derive(Config, Debug)]
pub struct MethodConfig {
    #[config(default = 50)]
    pub num_epochs: usize,
    #[config(default = 100)]
    pub batch_size: usize,
    /// Epochs without validation-loss improvement before training stops.
    /// `0` disables early stopping.
    #[config(default = 20)]
    pub tries_early_stopping: usize,
    /// Share of the training events held out for validation.
    #[config(default = 0.2)]
    pub validation_fraction: f64,
    /// Only write the trained model when the validation loss improves.
    #[config(default = true)]
    pub save_best_only: bool,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 0)]
    pub seed: u64,
}

/// Averages of one epoch. A diverged epoch keeps its NaN loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    #[serde(with = "crate::utils::float_serde")]
    pub train_loss: f64,
    #[serde(with = "crate::utils::float_serde")]
    pub train_accuracy: f64,
    #[serde(with = "crate::utils::float_serde::option")]
    pub valid_loss: Option<f64>,
    #[serde(with = "crate::utils::float_serde::option")]
    pub valid_accuracy: Option<f64>,
}

impl EpochSummary {
    /// Loss watched by early stopping: validation if available, else training.
    pub fn monitored_loss(&self) -> f64 {
        self.valid_loss.unwrap_or(self.train_loss)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub n_train: usize,
    pub n_valid: usize,
    pub best_epoch: Option<usize>,
    #[serde(with = "crate::utils::float_serde::option")]
    pub best_loss: Option<f64>,
    pub stopped_early: bool,
    pub history: Vec<EpochSummary>,
}

/// Tracks the best monitored loss and how long ago it improved.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<(usize, f64)>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
        }
    }

    /// Records the loss of `epoch`, returning whether it is a new best.
    pub fn update(&mut self, epoch: usize, loss: f64) -> bool {
        let improved = match self.best {
            None => !loss.is_nan(),
            Some((_, best)) => loss < best,
        };
        if improved {
            self.best = Some((epoch, loss));
            self.wait = 0;
        } else {
            self.wait += 1;
        }
        improved
    }

    pub fn should_stop(&self) -> bool {
        self.patience > 0 && self.wait >= self.patience
    }

    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }
}

/// Splits off the validation events with a seeded shuffle.
pub fn hold_out_validation(
    mut events: Vec<ImageEvent>,
    fraction: f64,
    seed: u64,
) -> (Vec<ImageEvent>, Vec<ImageEvent>) {
    let n_valid = ((events.len() as f64 * fraction).round() as usize).min(events.len());
    if n_valid == 0 {
        return (events, Vec::new());
    }
    events.shuffle(&mut StdRng::seed_from_u64(seed));
    let valid = events.split_off(events.len() - n_valid);
    (events, valid)
}

/// Trains the untrained artifact on `events`, writing the best model to
/// `trained_dir`.
///
/// Returns the best model (lowest monitored loss) on the inner backend.
pub fn train<AutoB: AutodiffBackend>(
    untrained: &ModelArtifact,
    trained_dir: &Path,
    config: &MethodConfig,
    events: Vec<ImageEvent>,
    device: &AutoB::Device,
) -> error::Result<(CaloCnn<AutoB::InnerBackend>, TrainingReport)> {
    let n_classes = untrained.config.network.n_classes;
    if n_classes != EventClass::ALL.len() {
        return Err(Error::OutputLength {
            expected: EventClass::ALL.len(),
            got: n_classes,
        });
    }
    AutoB::seed(device, config.seed);

    let mut model: CaloCnn<AutoB> = untrained.load_model(device)?;
    let mut optim: CaloOptimizer<AutoB> = untrained.load_optim(device)?;
    let lr = untrained.learning_rate();
    let loss = untrained.config.compile.loss.init();
    let trained = ModelArtifact {
        dir: trained_dir.to_path_buf(),
        config: untrained.config.clone(),
    };

    if let Some(event) = events.first() {
        model.check_input(event.image.len())?;
    }
    let (train_events, valid_events) =
        hold_out_validation(events, config.validation_fraction, config.seed);
    let (n_train, n_valid) = (train_events.len(), valid_events.len());
    if n_train == 0 {
        return Err(Error::InvalidSplit("no events left for training".to_string()));
    }
    log::info!("Training on {n_train} events, validating on {n_valid} events");

    let dataloader_train: Dataloader<AutoB> = DataLoaderBuilder::new(EventBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(InMemDataset::new(train_events));
    let dataloader_valid: Option<Dataloader<AutoB::InnerBackend>> = (n_valid > 0).then(|| {
        DataLoaderBuilder::new(EventBatcher::default())
            .batch_size(config.batch_size)
            .num_workers(config.num_workers)
            .build(InMemDataset::new(valid_events))
    });

    let mut metric_meta = MetricMetadata {
        progress: burn::data::dataloader::Progress::new(0, n_train),
        epoch: 1,
        epoch_total: config.num_epochs,
        iteration: 0,
        lr: Some(lr),
    };

    let mut stopper = EarlyStopping::new(config.tries_early_stopping);
    let mut best_model = None;
    let mut history = Vec::with_capacity(config.num_epochs);
    let mut stopped_early = false;

    log::info!("Starting training...");
    for epoch in 1..config.num_epochs + 1 {
        metric_meta.epoch = epoch;
        metric_meta.progress = burn::data::dataloader::Progress::new(0, n_train);

        let (model_, train_loss, train_accuracy) = epoch_train::<AutoB>(
            Arc::clone(&dataloader_train),
            model,
            &mut optim,
            &loss,
            lr,
            config.batch_size,
            &mut metric_meta,
        );
        model = model_;

        let valid = dataloader_valid.as_ref().map(|dataloader| {
            epoch_valid::<AutoB::InnerBackend>(
                Arc::clone(dataloader),
                model.valid(),
                &loss,
                epoch,
                config.num_epochs,
            )
        });
        let summary = EpochSummary {
            epoch,
            train_loss,
            train_accuracy,
            valid_loss: valid.map(|(l, _)| l),
            valid_accuracy: valid.map(|(_, a)| a),
        };
        history.push(summary);

        if stopper.update(epoch, summary.monitored_loss()) {
            log::info!(
                "Epoch {epoch}: loss improved to {:.4}, saving model",
                summary.monitored_loss()
            );
            trained.save(&model, &optim)?;
            best_model = Some(model.valid());
        } else if !config.save_best_only {
            trained.save(&model, &optim)?;
        }

        if stopper.should_stop() {
            log::info!(
                "Stopping after epoch {epoch}: no improvement for {} epochs",
                config.tries_early_stopping
            );
            stopped_early = true;
            break;
        }
    }
    log::info!("Training finished.");

    let best = stopper.best();
    let best_model = best_model.unwrap_or_else(|| model.valid());
    let report = TrainingReport {
        n_train,
        n_valid,
        best_epoch: best.map(|(epoch, _)| epoch),
        best_loss: best.map(|(_, loss)| loss),
        stopped_early,
        history,
    };
    Ok((best_model, report))
}

type Dataloader<B> = Arc<dyn DataLoader<B, EventBatch<B>> + 'static>;

/// Runs one pass over the training events, returning the updated model and
/// the epoch's average loss and accuracy.
pub fn epoch_train<AutoB: AutodiffBackend>(
    dataloader_train: Dataloader<AutoB>,
    mut model: CaloCnn<AutoB>,
    optim: &mut CaloOptimizer<AutoB>,
    loss: &BinaryCrossEntropyLoss,
    lr: f64,
    batch_size: usize,
    metric_meta: &mut MetricMetadata,
) -> (CaloCnn<AutoB>, f64, f64) {
    let mut loss_metric = burn::train::metric::LossMetric::<AutoB>::new();
    let mut acc_metric = burn::train::metric::AccuracyMetric::<AutoB>::new();
    let num_batches = dataloader_train.num_items().div_ceil(batch_size.max(1));

    for (mut b, batch) in dataloader_train.iter().enumerate() {
        b += 1;
        let [batch_size, _n_variables] = batch.images.dims();
        metric_meta.iteration += 1;
        metric_meta.progress.items_processed += batch_size;

        let output = forward_classification(&model, loss, batch);
        acc_metric.update(&output.adapt(), metric_meta);
        loss_metric.update(&output.adapt(), metric_meta);

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(lr, model, grads);

        log::debug!(
            "Epoch {}/{}, Batch {b:0>4}/{num_batches}, Loss {:.4}, Acc {:0>6.2}",
            metric_meta.epoch,
            metric_meta.epoch_total,
            loss_metric.value().current(),
            acc_metric.value().current(),
        );
    }

    let avg_loss = loss_metric.running_value().current();
    let avg_acc = acc_metric.running_value().current();
    log::info!(
        "Epoch {}/{}, Avg Loss {avg_loss:.4}, Avg Acc {avg_acc:.2}",
        metric_meta.epoch,
        metric_meta.epoch_total,
    );
    (model, avg_loss, avg_acc)
}

/// Average validation loss and accuracy.
pub fn epoch_valid<B: Backend>(
    dataloader_valid: Dataloader<B>,
    model: CaloCnn<B>,
    loss: &BinaryCrossEntropyLoss,
    epoch: usize,
    epoch_total: usize,
) -> (f64, f64) {
    let mut metric_meta = MetricMetadata {
        progress: burn::data::dataloader::Progress::new(0, dataloader_valid.num_items()),
        epoch,
        epoch_total,
        iteration: 0,
        lr: None,
    };
    let mut loss_metric = burn::train::metric::LossMetric::<B>::new();
    let mut acc_metric = burn::train::metric::AccuracyMetric::<B>::new();

    for batch in dataloader_valid.iter() {
        let [batch_size, _n_variables] = batch.images.dims();
        metric_meta.iteration += 1;
        metric_meta.progress.items_processed += batch_size;

        let output = forward_classification(&model, loss, batch);
        acc_metric.update(&output.adapt(), &metric_meta);
        loss_metric.update(&output.adapt(), &metric_meta);
    }

    let avg_loss = loss_metric.running_value().current();
    let avg_acc = acc_metric.running_value().current();
    log::info!(
        "Epoch {epoch}/{epoch_total}, Avg Valid Loss {avg_loss:.4}, Avg Valid Acc {avg_acc:.2}"
    );
    (avg_loss, avg_acc)
}

/// Forward pass with the weighted loss, packaged for the metrics.
pub fn forward_classification<B: Backend>(
    model: &CaloCnn<B>,
    loss: &BinaryCrossEntropyLoss,
    batch: EventBatch<B>,
) -> ClassificationOutput<B> {
    let [batch_size, _n_variables] = batch.images.dims();
    let probs = model.forward(batch.images);
    // output size is checked against the event classes before training
    assert_eq!([batch_size, EventClass::ALL.len()], probs.dims());

    let loss = loss.forward(probs.clone(), batch.targets, batch.weights);
    ClassificationOutput::new(loss, probs, batch.labels)
}
