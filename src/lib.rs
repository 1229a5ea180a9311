pub mod cli;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod filter;
pub mod inference;
pub mod landmark;
pub mod pool;
pub mod utils;
pub mod vectorize;

pub use config::Opts;
pub use dataset::{DatasetTable, FeatureVector, SplitSchemes};
pub use detector::{DetectError, Detection, Hand, HandDetector};
pub use pool::WorkerPool;
