//! Pipeline configuration.
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file (or no file at all) describes the standard churn pipeline.

mod loader;
mod model;

pub use loader::{default_config_path, load_from_path, load_or_default, parse_str, DEFAULT_CONFIG_FILE};
pub use model::{
    AcquireConfig, DataSource, PipelineConfig, ResolvedStep, ServiceConfig, Step, StepConfig,
    StepsConfig,
};
