//! Model artifacts: a directory holding the model topology and compile
//! settings (`model_config.json`), the weights (`model.mpk`) and the optimizer
//! state (`optim.mpk`).
//!
//! An artifact is only ever rewritten as a whole.

use crate::backend::RecorderTy;
use crate::cnn::{CaloCnn, CaloCnnConfig};
use crate::error::{self, Error};
use crate::utils::loss::BinaryCrossEntropyLossConfig;
use burn::optim::{Adam, AdamConfig, Optimizer, adaptor::OptimizerAdaptor};
use burn::record::{FileRecorder, Recorder};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use std::path::{Path, PathBuf};

pub const MODEL_CONFIG_NAME: &str = "model_config";
pub const MODEL_NAME: &str = "model";
pub const OPTIM_NAME: &str = "optim";

pub type CaloOptimizer<AutoB> = OptimizerAdaptor<Adam, CaloCnn<AutoB>, AutoB>;

/// Loss, optimizer and step size the network is trained with.
#[derive(Config, Debug)]
pub struct CompileConfig {
    #[config(default = "BinaryCrossEntropyLossConfig::new()")]
    pub loss: BinaryCrossEntropyLossConfig,
    #[config(default = "optimizer_config()")]
    pub optimizer: AdamConfig,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
}

/// Adam with the usual deep-learning defaults (β1 0.9, β2 0.999, ε 1e-7).
pub fn optimizer_config() -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-7)
}

#[derive(Config, Debug)]
pub struct ArtifactConfig {
    pub network: CaloCnnConfig,
    #[config(default = "CompileConfig::new()")]
    pub compile: CompileConfig,
}

impl ArtifactConfig {
    /// The calorimeter CNN compiled with binary cross-entropy and Adam at 0.001.
    pub fn calorimeter() -> Self {
        Self::new(CaloCnnConfig::calorimeter())
    }
}

/// Handle on a model artifact directory and its loaded config.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub dir: PathBuf,
    pub config: ArtifactConfig,
}

impl ModelArtifact {
    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join(MODEL_CONFIG_NAME).with_extension("json")
    }

    /// Weight file path including the recorder's extension.
    pub fn model_path<B: Backend>(dir: &Path) -> PathBuf {
        let file_ext = <RecorderTy as FileRecorder<B>>::file_extension();
        dir.join(MODEL_NAME).with_extension(file_ext)
    }

    /// Whether `dir` holds a complete model (config and weights).
    pub fn exists<B: Backend>(dir: &Path) -> bool {
        Self::config_path(dir).is_file() && Self::model_path::<B>(dir).is_file()
    }

    /// Builds, compiles and saves an untrained model, returning its handle.
    pub fn create<AutoB: AutodiffBackend>(
        dir: impl Into<PathBuf>,
        config: ArtifactConfig,
        device: &AutoB::Device,
    ) -> error::Result<Self> {
        let artifact = Self {
            dir: dir.into(),
            config,
        };
        let model: CaloCnn<AutoB> = artifact.config.network.init(device);
        let optim: CaloOptimizer<AutoB> = artifact.config.compile.optimizer.init();
        log::info!(
            "Creating model at {:?} ({} stages, {} parameters)",
            artifact.dir,
            model.num_stages(),
            model.num_params()
        );
        artifact.save(&model, &optim)?;
        Ok(artifact)
    }

    /// Opens an existing artifact, failing with [`Error::ModelNotFound`] if
    /// its config or weights are missing.
    pub fn open<B: Backend>(dir: impl Into<PathBuf>) -> error::Result<Self> {
        let dir = dir.into();
        if !Self::exists::<B>(&dir) {
            return Err(Error::ModelNotFound(dir));
        }
        let path = Self::config_path(&dir);
        log::debug!("Loading model config from {path:?}");
        let config = ArtifactConfig::load(&path)?;
        Ok(Self { dir, config })
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.compile.learning_rate
    }

    pub fn save_config(&self) -> error::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = Self::config_path(&self.dir);
        log::debug!("Saving model config into {path:?}");
        self.config.save(&path)?;
        Ok(())
    }

    pub fn save_model<B: Backend>(&self, model: &CaloCnn<B>) -> error::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(MODEL_NAME);
        log::debug!("Saving model to {:?}", Self::model_path::<B>(&self.dir));
        model.clone().save_file(path, &RecorderTy::new())?; // ext added automatically
        Ok(())
    }

    pub fn load_model<B: Backend>(&self, device: &B::Device) -> error::Result<CaloCnn<B>> {
        let path = self.dir.join(MODEL_NAME);
        log::debug!("Loading model from {:?}", Self::model_path::<B>(&self.dir));
        let model_init = self.config.network.init::<B>(device);
        let model = model_init.load_file(path, &RecorderTy::new(), device)?;
        Ok(model)
    }

    pub fn save_optim<AutoB: AutodiffBackend>(
        &self,
        optim: &CaloOptimizer<AutoB>,
    ) -> error::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(OPTIM_NAME);
        log::debug!("Saving optim to {path:?}");
        let record = optim.to_record();
        <RecorderTy as Recorder<AutoB>>::record(&RecorderTy::new(), record, path)?; // ext added automatically
        Ok(())
    }

    /// The optimizer with its saved state, or a fresh one if no state exists.
    pub fn load_optim<AutoB: AutodiffBackend>(
        &self,
        device: &AutoB::Device,
    ) -> error::Result<CaloOptimizer<AutoB>> {
        let optim_init: CaloOptimizer<AutoB> = self.config.compile.optimizer.init();
        let path = self.dir.join(OPTIM_NAME);
        let file_ext = <RecorderTy as FileRecorder<AutoB>>::file_extension();
        if !path.with_extension(file_ext).is_file() {
            log::debug!("No optimizer state at {path:?}, starting fresh");
            return Ok(optim_init);
        }
        log::debug!("Loading optim from {path:?}");
        let record = <RecorderTy as Recorder<AutoB>>::load(&RecorderTy::new(), path, device)?;
        Ok(optim_init.load_record(record))
    }

    /// Rewrites the whole artifact: config, weights and optimizer state.
    pub fn save<AutoB: AutodiffBackend>(
        &self,
        model: &CaloCnn<AutoB>,
        optim: &CaloOptimizer<AutoB>,
    ) -> error::Result<()> {
        self.save_config()?;
        self.save_model(model)?;
        self.save_optim(optim)
    }

    /// Overwrites the optimizer step size and re-saves the artifact.
    ///
    /// Returns whether anything changed; an artifact already at
    /// `learning_rate` is left untouched.
    pub fn set_learning_rate<AutoB: AutodiffBackend>(
        &mut self,
        learning_rate: f64,
        device: &AutoB::Device,
    ) -> error::Result<bool> {
        let current = self.learning_rate();
        if current == learning_rate {
            log::debug!("Learning rate already at {learning_rate}");
            return Ok(false);
        }
        log::info!("Changing learning rate from {current} to {learning_rate}");
        let model = self.load_model::<AutoB>(device)?;
        let optim = self.load_optim::<AutoB>(device)?;
        self.config.compile.learning_rate = learning_rate;
        self.save(&model, &optim)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnn::ConvStageConfig;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;
    type AutoB = Autodiff<B>;

    fn tiny_config() -> ArtifactConfig {
        ArtifactConfig::new(
            CaloCnnConfig::new(vec![
                ConvStageConfig::new(2).with_pool_size(2),
                ConvStageConfig::new(2).with_pool_size(2),
            ])
            .with_height(8)
            .with_width(8),
        )
    }

    #[test]
    fn create_then_open() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let dir = tmp.path().join("model");
        let device = Default::default();

        assert!(!ModelArtifact::exists::<AutoB>(&dir));
        ModelArtifact::create::<AutoB>(&dir, tiny_config(), &device).unwrap();
        assert!(ModelArtifact::exists::<AutoB>(&dir));

        let artifact = ModelArtifact::open::<AutoB>(&dir).unwrap();
        assert_eq!(tiny_config().network, artifact.config.network);
        assert_eq!(1e-3, artifact.learning_rate());

        let model = artifact.load_model::<B>(&device).unwrap();
        assert_eq!(2, model.num_stages());
        let _optim = artifact.load_optim::<AutoB>(&device).unwrap();
    }

    #[test]
    fn open_missing_is_model_not_found() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let dir = tmp.path().join("absent");
        match ModelArtifact::open::<B>(&dir) {
            Err(Error::ModelNotFound(path)) => assert_eq!(dir, path),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn weights_survive_a_round_trip() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let device = Default::default();
        let artifact = ModelArtifact::create::<AutoB>(tmp.path(), tiny_config(), &device).unwrap();

        let a = artifact.load_model::<B>(&device).unwrap();
        let b = artifact.load_model::<B>(&device).unwrap();
        let wa: Vec<f32> = a.output.weight.val().into_data().to_vec().unwrap();
        let wb: Vec<f32> = b.output.weight.val().into_data().to_vec().unwrap();
        assert_eq!(wa, wb);
    }

    #[test]
    fn learning_rate_overwrite_is_idempotent() {
        let tmp = temp_dir::TempDir::new().unwrap();
        let device = Default::default();
        let mut artifact =
            ModelArtifact::create::<AutoB>(tmp.path(), tiny_config(), &device).unwrap();

        assert!(artifact.set_learning_rate::<AutoB>(5e-4, &device).unwrap());
        let reopened = ModelArtifact::open::<B>(tmp.path()).unwrap();
        assert_eq!(5e-4, reopened.learning_rate());

        let mut reopened = reopened;
        assert!(!reopened.set_learning_rate::<AutoB>(5e-4, &device).unwrap());
        let again = ModelArtifact::open::<B>(tmp.path()).unwrap();
        assert_eq!(5e-4, again.learning_rate());
    }
}
