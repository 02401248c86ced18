pub mod aggregate;
pub mod cache;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod quality;
pub mod schema;
pub mod snapshot;
pub mod stations;
pub mod stats;
pub mod types;

pub use error::{PipelineError, Result};
