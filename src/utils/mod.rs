pub mod log_throttle;
pub mod logger;

pub use logger::init_logging;
