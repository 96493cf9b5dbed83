/*!
 * Shared data types for regbridge.
 *
 * These types cross crate boundaries: device identifiers, request
 * correlation ids and the result code handed back to the host engine.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest device identifier accepted, in characters
pub const MAX_UID_CHARS: usize = 132;

/// A device unique identifier, bounded to [`MAX_UID_CHARS`] characters
///
/// Longer input is truncated on a character boundary, matching how the host
/// engine stores identifiers in fixed buffers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceUid(String);

impl DeviceUid {
    /// Create a uid, truncating to [`MAX_UID_CHARS`] characters
    pub fn new<S: AsRef<str>>(uid: S) -> Self {
        let uid = uid.as_ref();
        match uid.char_indices().nth(MAX_UID_CHARS) {
            Some((cut, _)) => Self(uid[..cut].to_string()),
            None => Self(uid.to_string()),
        }
    }

    /// Get the string representation of the uid
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the uid is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceUid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceUid {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for DeviceUid {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DeviceUid {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Correlation id of a host request, echoed back with its result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Create a request id from a random UUID, for requests raised internally
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a request id from the host's own id
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Result code reported to the host engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// The request completed
    Success,
    /// The request failed; the log carries the reason
    Failure,
    /// The request could not be accepted right now
    Busy,
}

impl ResultCode {
    /// Whether this is [`ResultCode::Success`]
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Success => write!(f, "success"),
            ResultCode::Failure => write!(f, "failure"),
            ResultCode::Busy => write!(f, "busy"),
        }
    }
}
