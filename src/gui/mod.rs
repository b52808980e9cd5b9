//! The optional terminal monitor for a running session.

mod error;
mod session_monitor;

pub use error::MonitorError;
pub use session_monitor::{format_elapsed, session_monitor, status_rows, MonitorView};
