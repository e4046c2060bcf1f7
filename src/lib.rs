//! Host pipeline around a prebuilt vision graph engine: camera frames go in
//! one at a time, asynchronous engine results come back out as textures,
//! rigid transforms and reconstructed geometry for a presenter.

pub mod config;
pub mod error;
pub mod geometry;
pub mod graph;
#[cfg(feature = "engine-ort")]
pub mod model_download;
pub mod pipeline;
pub mod profile;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use graph::GraphDescription;
pub use pipeline::Pipeline;
pub use profile::GraphProfile;
