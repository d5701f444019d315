//! Client configuration: a versioned YAML file overlaid with `TRAINLOG_*`
//! environment variables.
pub mod logging;
pub mod types;

pub use logging::*;
pub use types::*;
