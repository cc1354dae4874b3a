mod batcher;
mod event;
mod loader;
mod tree;

pub use batcher::{EventBatch, EventBatcher};
pub use event::{EventClass, ImageEvent};
pub use loader::{
    EventDataSet, EventLoader, NormMode, SplitConfig, SplitMode, SplitPlan, SplitSummary,
    renormalize,
};
pub use tree::{ImageTree, read_list_branch, write_image_tree};
