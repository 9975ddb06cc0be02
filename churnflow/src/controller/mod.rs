//! The churn pipeline controller.
//!
//! Composes the scheduler and the process supervisor into the fixed step
//! sequence: acquire data, start the API service, ingest, stop the service,
//! then validate, prepare, transform and optionally train.

mod runner;
mod steps;

pub use runner::{PipelineController, PipelineOutcome, ServiceReport};
pub use steps::{PipelineStep, PipelineSteps, ServiceSettings};

/// Task id of data acquisition.
pub const GET_DATA: &str = "get_data";
/// Task id of the service start and readiness wait.
pub const START_PROC: &str = "start_proc";
/// Task id of ingestion.
pub const INGEST: &str = "ingest";
/// Task id of raw data validation.
pub const VALIDATE: &str = "validate";
/// Task id of data preparation.
pub const PREPARE: &str = "prepare";
/// Task id of feature transformation.
pub const TRANSFORM: &str = "transform";
/// Task id of model training.
pub const TRAIN: &str = "train";
