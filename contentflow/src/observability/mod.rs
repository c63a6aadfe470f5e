//! Observability utilities.

mod logging;
mod timing;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use timing::{SpanTimer, StageSpan};
