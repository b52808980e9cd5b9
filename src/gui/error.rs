use std::{error::Error, fmt::Display};

/// Failures of the terminal monitor. None of them affect recording.
#[derive(Debug)]
pub enum MonitorError {
    /// Returned when the terminal cannot be set up, drawn or read.
    IOError(std::io::Error),
}

impl Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let MonitorError::IOError(e) = self;
        write!(f, "terminal error: {e}")
    }
}

impl Error for MonitorError {}

impl From<std::io::Error> for MonitorError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}
