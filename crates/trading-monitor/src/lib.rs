//! Logging setup and portfolio reporting.

mod logging;
mod summary;

pub use logging::{setup_logging, LoggingOptions};
pub use summary::{log_snapshot, render_snapshot};
