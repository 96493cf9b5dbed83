/*!
 * Error types for the regbridge engine crate.
 */
use thiserror::Error;

use regbridge_core::types::ResultCode;
use regbridge_devices::DeviceError;

/// Error type for regbridge engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Action queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Dispatcher error
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// The request could not be accepted right now
    #[error("Busy: {0}")]
    Busy(String),

    /// An action ran past its budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] regbridge_core::error::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for regbridge engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new queue error
    pub fn queue<S: AsRef<str>>(msg: S) -> Self {
        Error::Queue(msg.as_ref().to_string())
    }

    /// Create a new dispatch error
    pub fn dispatch<S: AsRef<str>>(msg: S) -> Self {
        Error::Dispatch(msg.as_ref().to_string())
    }

    /// Create a new busy error
    pub fn busy<S: AsRef<str>>(msg: S) -> Self {
        Error::Busy(msg.as_ref().to_string())
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::Timeout(msg.as_ref().to_string())
    }

    /// Create a new not found error
    pub fn not_found<S: AsRef<str>>(msg: S) -> Self {
        Error::NotFound(msg.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn configuration<S: AsRef<str>>(msg: S) -> Self {
        Error::Configuration(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }

    /// Code reported to the host for this error
    ///
    /// Only a busy queue is reported as [`ResultCode::Busy`]; timeouts and
    /// every other failure are reported as [`ResultCode::Failure`].
    pub fn result_code(&self) -> ResultCode {
        match self {
            Error::Busy(_) => ResultCode::Busy,
            _ => ResultCode::Failure,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(Error::busy("queue full").result_code(), ResultCode::Busy);
        assert_eq!(Error::timeout("read").result_code(), ResultCode::Failure);
        assert_eq!(
            Error::from(DeviceError::not_found("D1")).result_code(),
            ResultCode::Failure
        );
    }
}
