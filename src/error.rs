use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The untrained model artifact was not found where the method expects it.
    #[error("model not found at {0:?}")]
    ModelNotFound(PathBuf),

    #[error("input has {got} values per image, expected {expected}")]
    InputLength { expected: usize, got: usize },

    #[error("model has {got} output units, expected one per event class ({expected})")]
    OutputLength { expected: usize, got: usize },

    #[error("tree {path:?} has no branch named '{branch}'")]
    MissingBranch { path: PathBuf, branch: String },

    #[error("branch '{branch}' has unsupported type {found}")]
    BranchType { branch: String, found: String },

    #[error("row {row} of branch '{branch}' is null")]
    NullRow { branch: String, row: usize },

    #[error("no {0} events were loaded")]
    EmptyClass(&'static str),

    #[error("unknown lane {0}")]
    UnknownLane(i64),

    #[error("hit lists differ in length: {columns} columns, {rows} rows, {lanes} lanes")]
    HitListLength {
        columns: usize,
        rows: usize,
        lanes: usize,
    },

    #[error("hit (column {column}, row {row}) is outside the sensor plane")]
    HitOutOfRange { column: i64, row: i64 },

    #[error("event {event} requested, the tree has {n_events} events")]
    EventIndex { event: usize, n_events: usize },

    #[error("quantization {0} must be between 1 and 1024")]
    Quantization(usize),

    #[error("invalid split: {0}")]
    InvalidSplit(String),

    #[error("no method named '{0}' has been booked")]
    MethodNotBooked(String),

    #[error("a method named '{0}' is already booked")]
    DuplicateMethod(String),

    #[error("method '{0}' must be trained and tested before this step")]
    NotTrained(String),

    #[error("could not read tensor data: {0}")]
    TensorData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("record error: {0}")]
    Record(#[from] burn::record::RecorderError),

    #[error("config error: {0}")]
    Config(#[from] burn::config::ConfigError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
