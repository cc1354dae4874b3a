pub mod artifact;
pub mod backend;
pub mod cli;
pub mod cnn;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod factory;
pub mod projection;
pub mod training;
pub mod utils;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::artifact::{ArtifactConfig, CompileConfig, ModelArtifact};
    pub use crate::cnn::{CaloCnn, CaloCnnConfig, ConvStage, ConvStageConfig};
    pub use crate::data::{
        EventClass, EventDataSet, EventLoader, ImageEvent, ImageTree, NormMode, SplitConfig,
        SplitMode,
    };
    pub use crate::evaluation::{MethodEvaluation, RocCurve};
    pub use crate::factory::{Factory, ResultsFile};
    pub use crate::training::{MethodConfig, TrainingReport};
}
