pub mod float_serde;
pub mod loss;
