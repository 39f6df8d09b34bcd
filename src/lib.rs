pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fingerprint;
mod metrics;
pub mod ranker;
pub mod report;
pub mod scanner;
mod utils;

pub use config::Opts;
pub use engine::{CancelToken, Engine, SearchOutcome};
pub use error::SearchError;
