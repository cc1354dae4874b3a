use anyhow::Context;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use calo_cnn::artifact::{ArtifactConfig, ModelArtifact};
use calo_cnn::backend::{MainAutoBackend, MainDevice};
use calo_cnn::cli::CreateModelArgs;

pub fn launch<AutoB: AutodiffBackend + MainDevice>(args: &CreateModelArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => ArtifactConfig::load(path)
            .with_context(|| format!("failed to load the model config {path:?}"))?,
        None => ArtifactConfig::calorimeter(),
    };

    let device = AutoB::main_device();
    let artifact = ModelArtifact::create::<AutoB>(&args.model, config, &device)
        .with_context(|| format!("failed to create the model at {:?}", args.model))?;

    let network = &artifact.config.network;
    log::info!(
        "Input {}x{}x{}, {} stages, feature map {:?}, {} outputs",
        network.height,
        network.width,
        network.channels,
        network.stages.len(),
        network.feature_shape(),
        network.n_classes
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CreateModelArgs::parse()?;
    launch::<MainAutoBackend>(&args)
}
