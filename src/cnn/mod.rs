mod network;
mod stage;

pub use network::{CaloCnn, CaloCnnConfig, IMAGE_LEN, IMAGE_SIDE};
pub use stage::{ConvStage, ConvStageConfig, same_padding};
