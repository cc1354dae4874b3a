mod bce;

pub use bce::{BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig};
