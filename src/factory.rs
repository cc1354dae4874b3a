//! Books classification methods on prepared datasets and drives their
//! training, testing and evaluation, collecting everything into a results
//! file.

use crate::artifact::ModelArtifact;
use crate::cnn::CaloCnn;
use crate::data::{EventClass, EventDataSet, EventLoader, SplitSummary};
use crate::error::{Error, Result};
use crate::evaluation::{EventScore, MethodEvaluation, RocCurve, score_events};
use crate::training::{self, MethodConfig, TrainingReport};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct BookedMethod<B: burn::prelude::Backend> {
    name: String,
    dataset_name: String,
    dataset: Arc<EventDataSet>,
    untrained: ModelArtifact,
    trained_dir: PathBuf,
    config: MethodConfig,
    model: Option<CaloCnn<B>>,
    training: Option<TrainingReport>,
    test_scores: Option<Vec<EventScore>>,
    train_scores: Option<Vec<EventScore>>,
    evaluation: Option<MethodEvaluation>,
}

/// Everything known about one method when the factory is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodResult {
    pub name: String,
    pub dataset: String,
    pub untrained_model: PathBuf,
    pub trained_model: PathBuf,
    pub split: SplitSummary,
    pub config: MethodConfig,
    pub training: Option<TrainingReport>,
    pub evaluation: Option<MethodEvaluation>,
    /// Per-event scores on the testing set.
    pub test_scores: Vec<EventScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsFile {
    pub job_name: String,
    pub methods: Vec<MethodResult>,
}

impl ResultsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Path of the ROC plot written next to the results file.
pub fn roc_plot_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    output_path.with_file_name(format!("{stem}_roc.svg"))
}

pub struct Factory<AutoB: AutodiffBackend> {
    pub job_name: String,
    pub output_path: PathBuf,
    device: AutoB::Device,
    methods: Vec<BookedMethod<AutoB::InnerBackend>>,
}

impl<AutoB: AutodiffBackend> Factory<AutoB> {
    /// Starts a session, recreating the results file at `output_path` empty so
    /// that an interrupted run leaves no stale results behind.
    pub fn new(
        job_name: impl Into<String>,
        output_path: impl Into<PathBuf>,
        device: AutoB::Device,
    ) -> Result<Self> {
        let job_name = job_name.into();
        let output_path = output_path.into();
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        File::create(&output_path)?;
        log::info!("[{job_name}] Results will be written to {output_path:?}");
        Ok(Self {
            job_name,
            output_path,
            device,
            methods: Vec::new(),
        })
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.name.as_str())
    }

    /// Registers the CNN stored at `untrained_dir` to be trained on `dataset`.
    ///
    /// Fails with [`Error::ModelNotFound`] if the artifact is missing, in which
    /// case nothing is registered. A model whose input or output size does not
    /// fit the dataset is rejected the same way.
    pub fn book_method(
        &mut self,
        loader: &EventLoader,
        dataset: Arc<EventDataSet>,
        name: impl Into<String>,
        untrained_dir: impl Into<PathBuf>,
        trained_dir: impl Into<PathBuf>,
        config: MethodConfig,
    ) -> Result<()> {
        let name = name.into();
        let untrained_dir = untrained_dir.into();
        if !ModelArtifact::exists::<AutoB>(&untrained_dir) {
            log::error!("[{}] Model not found at {untrained_dir:?}", self.job_name);
            return Err(Error::ModelNotFound(untrained_dir));
        }
        if self.methods.iter().any(|m| m.name == name) {
            return Err(Error::DuplicateMethod(name));
        }
        let untrained = ModelArtifact::open::<AutoB>(untrained_dir)?;
        let expected = untrained.config.network.input_len();
        if expected != dataset.n_variables {
            return Err(Error::InputLength {
                expected,
                got: dataset.n_variables,
            });
        }
        let n_classes = untrained.config.network.n_classes;
        if n_classes != EventClass::ALL.len() {
            return Err(Error::OutputLength {
                expected: EventClass::ALL.len(),
                got: n_classes,
            });
        }

        log::info!(
            "[{}] Booked method {name} on dataset {} ({} epochs, batch size {})",
            self.job_name,
            loader.name,
            config.num_epochs,
            config.batch_size
        );
        self.methods.push(BookedMethod {
            name,
            dataset_name: loader.name.clone(),
            dataset,
            untrained,
            trained_dir: trained_dir.into(),
            config,
            model: None,
            training: None,
            test_scores: None,
            train_scores: None,
            evaluation: None,
        });
        Ok(())
    }

    pub fn train_all_methods(&mut self) -> Result<()> {
        for method in self.methods.iter_mut() {
            log::info!("[{}] Train method: {}", self.job_name, method.name);
            let (model, report) = training::train::<AutoB>(
                &method.untrained,
                &method.trained_dir,
                &method.config,
                method.dataset.train.clone(),
                &self.device,
            )?;
            if let (Some(epoch), Some(loss)) = (report.best_epoch, report.best_loss) {
                log::info!(
                    "[{}] {}: best epoch {epoch} with loss {loss:.4}",
                    self.job_name,
                    method.name
                );
            }
            method.model = Some(model);
            method.training = Some(report);
        }
        Ok(())
    }

    /// Scores the testing events, and the training events for the
    /// overtraining check.
    pub fn test_all_methods(&mut self) -> Result<()> {
        for method in self.methods.iter_mut() {
            let model = method
                .model
                .as_ref()
                .ok_or_else(|| Error::NotTrained(method.name.clone()))?;
            log::info!("[{}] Test method: {}", self.job_name, method.name);
            let batch_size = method.config.batch_size;
            method.test_scores = Some(score_events(
                model,
                &method.dataset.test,
                batch_size,
                &self.device,
            )?);
            method.train_scores = Some(score_events(
                model,
                &method.dataset.train,
                batch_size,
                &self.device,
            )?);
        }
        Ok(())
    }

    pub fn evaluate_all_methods(&mut self) -> Result<()> {
        for method in self.methods.iter_mut() {
            let (Some(test), Some(train)) = (&method.test_scores, &method.train_scores) else {
                return Err(Error::NotTrained(method.name.clone()));
            };
            log::info!("[{}] Evaluate method: {}", self.job_name, method.name);
            method.evaluation = Some(MethodEvaluation::new(test, train)?);
        }
        self.log_evaluation();
        Ok(())
    }

    fn log_evaluation(&self) {
        log::info!(
            "[{}] {:<16} {:>8} {:>8} {:>8} {:>8} {:>10}",
            self.job_name,
            "Method",
            "ROC-AUC",
            "@B=0.01",
            "@B=0.10",
            "@B=0.30",
            "Separation"
        );
        for method in &self.methods {
            let Some(eval) = &method.evaluation else {
                continue;
            };
            let eff = |i: usize| {
                eval.efficiencies
                    .get(i)
                    .map(|e| e.signal_efficiency)
                    .unwrap_or(f64::NAN)
            };
            log::info!(
                "[{}] {:<16} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>10.3}",
                self.job_name,
                method.name,
                eval.roc_auc,
                eff(0),
                eff(1),
                eff(2),
                eval.separation
            );
            log::info!(
                "[{}] {:<16} {:>8.3} (training sample)",
                self.job_name,
                method.name,
                eval.roc_auc_train
            );
        }
    }

    fn method(&self, name: &str) -> Result<&BookedMethod<AutoB::InnerBackend>> {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::MethodNotBooked(name.to_string()))
    }

    /// ROC curve of an evaluated method.
    pub fn roc_curve(&self, name: &str) -> Result<&RocCurve> {
        let method = self.method(name)?;
        method
            .evaluation
            .as_ref()
            .map(|e| &e.roc)
            .ok_or_else(|| Error::NotTrained(name.to_string()))
    }

    pub fn evaluation(&self, name: &str) -> Result<&MethodEvaluation> {
        let method = self.method(name)?;
        method
            .evaluation
            .as_ref()
            .ok_or_else(|| Error::NotTrained(name.to_string()))
    }

    /// Writes the results file, truncating any previous one, and the ROC plot
    /// of the evaluated methods next to it.
    pub fn close(self) -> Result<ResultsFile> {
        let curves: Vec<(&str, &RocCurve)> = self
            .methods
            .iter()
            .filter_map(|m| m.evaluation.as_ref().map(|e| (m.name.as_str(), &e.roc)))
            .collect();
        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !curves.is_empty() {
            let path = roc_plot_path(&self.output_path);
            log::info!("[{}] Writing ROC curve to {path:?}", self.job_name);
            let title = format!("{}: background rejection vs signal efficiency", self.job_name);
            std::fs::write(&path, RocCurve::render_svg(&curves, &title))?;
        }

        let results = ResultsFile {
            job_name: self.job_name.clone(),
            methods: self
                .methods
                .into_iter()
                .map(|m| MethodResult {
                    name: m.name,
                    dataset: m.dataset_name,
                    untrained_model: m.untrained.dir,
                    trained_model: m.trained_dir,
                    split: m.dataset.summary,
                    config: m.config,
                    training: m.training,
                    evaluation: m.evaluation,
                    test_scores: m.test_scores.unwrap_or_default(),
                })
                .collect(),
        };

        log::info!("[{}] Writing results to {:?}", results.job_name, self.output_path);
        let mut writer = BufWriter::new(File::create(&self.output_path)?);
        serde_json::to_writer_pretty(&mut writer, &results)?;
        writer.flush()?;
        Ok(results)
    }
}
