use anyhow::Context;
use burn::tensor::backend::AutodiffBackend;
use calo_cnn::artifact::ModelArtifact;
use calo_cnn::backend::{MainAutoBackend, MainDevice, forward_thread_count};
use calo_cnn::cli::{TrainArgs, TrainingConfig, save_training_config};
use calo_cnn::data::{EventLoader, ImageTree};
use calo_cnn::factory::{Factory, roc_plot_path};
use std::sync::Arc;

pub fn launch<AutoB: AutodiffBackend + MainDevice>(config: TrainingConfig) -> anyhow::Result<()> {
    let device = AutoB::main_device();

    // the step size is stored in the artifact; only re-save on change
    let mut untrained = ModelArtifact::open::<AutoB>(&config.model_dir)
        .with_context(|| format!("cannot use the model at {:?}", config.model_dir))?;
    untrained
        .set_learning_rate::<AutoB>(config.learning_rate, &device)
        .context("failed to update the learning rate")?;

    let mut loader = EventLoader::new("dataset");
    loader.add_signal_tree(ImageTree::file(&config.signal_path), config.signal_weight);
    loader.add_background_tree(
        ImageTree::file(&config.background_path),
        config.background_weight,
    );
    loader.add_variables_array(&config.branch, config.image_len);
    let dataset = loader
        .prepare_training_and_test_tree(&config.split)
        .context("failed to prepare the training and testing events")?;

    let mut factory = Factory::<AutoB>::new(&config.job_name, &config.output_path, device)
        .with_context(|| format!("cannot create the results file {:?}", config.output_path))?;
    factory.book_method(
        &loader,
        Arc::new(dataset),
        &config.method_name,
        &untrained.dir,
        &config.trained_model_dir,
        config.method.clone(),
    )?;

    factory.train_all_methods().context("training failed")?;
    factory.test_all_methods().context("testing failed")?;
    factory.evaluate_all_methods().context("evaluation failed")?;

    let roc = factory.roc_curve(&config.method_name)?;
    log::info!(
        "{}: ROC integral {:.4}, plot in {:?}",
        config.method_name,
        roc.auc(),
        roc_plot_path(&config.output_path)
    );

    factory.close().context("failed to write the results")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = TrainArgs::parse()?;
    let mut config = args.training_config()?;

    if let Some(path) = &args.save_config {
        save_training_config(path, &config)?;
        return Ok(());
    }

    forward_thread_count(config.num_threads).context("failed to size the worker pool")?;
    if config.num_threads > 0 {
        config.method.num_workers = config.num_threads;
    }

    launch::<MainAutoBackend>(config)
}
