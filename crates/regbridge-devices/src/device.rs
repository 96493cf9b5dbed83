/*!
 * Device descriptors and the device error type.
 *
 * A [`DeviceDescriptor`] is what the host engine hands over when it signals a
 * device lifecycle event: the host handle, the unique id and the interface
 * blocks with their datapoint counts.
 */
use serde::{Deserialize, Serialize};
use thiserror::Error;

use regbridge_core::types::DeviceUid;

/// Error type for device storage, registry and bridge operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The registry already holds the configured number of devices
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A device, binding or register was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A device id or handle is not usable
    #[error("Invalid device id: {0}")]
    InvalidId(String),

    /// A datapoint could not be bound
    #[error("Binding error: {0}")]
    Binding(String),

    /// Storage for a device could not be reserved
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// A value could not be converted between host and JSON form
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A cell holds no value
    #[error("No value available: {0}")]
    NoValue(String),

    /// A topic could not be built or parsed
    #[error("Topic error: {0}")]
    Topic(String),

    /// The broker transport failed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] regbridge_core::error::Error),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new not found error
    pub fn not_found<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::NotFound(msg.as_ref().to_string())
    }

    /// Create a new binding error
    pub fn binding<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Binding(msg.as_ref().to_string())
    }

    /// Create a new conversion error
    pub fn conversion<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Conversion(msg.as_ref().to_string())
    }

    /// Create a new topic error
    pub fn topic<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Topic(msg.as_ref().to_string())
    }

    /// Create a new protocol error
    pub fn protocol<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Protocol(msg.as_ref().to_string())
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Conversion(err.to_string())
    }
}

/// A datapoint entry of an interface block, with the number of registers it declares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDatapoint {
    /// Datapoint name
    pub name: String,
    /// Number of registers declared by this entry
    pub dp_count: usize,
}

/// An interface block of a device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterfaceBlock {
    /// Block name
    pub name: String,
    /// Datapoint entries of the block
    #[serde(default)]
    pub datapoints: Vec<InterfaceDatapoint>,
}

impl InterfaceBlock {
    /// Create an empty interface block
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            datapoints: Vec::new(),
        }
    }

    /// Add a datapoint entry declaring `dp_count` registers
    pub fn with_datapoint<S: Into<String>>(mut self, name: S, dp_count: usize) -> Self {
        self.datapoints.push(InterfaceDatapoint {
            name: name.into(),
            dp_count,
        });
        self
    }
}

/// Host-side description of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Host handle; identifies the device across requests
    pub handle: String,
    /// Unique id, also the device segment of register topics
    pub uid: DeviceUid,
    /// Interface blocks of the device
    #[serde(default)]
    pub interface_blocks: Vec<InterfaceBlock>,
}

impl DeviceDescriptor {
    /// Create a descriptor without interface blocks
    pub fn new<H: Into<String>, U: Into<DeviceUid>>(handle: H, uid: U) -> Self {
        Self {
            handle: handle.into(),
            uid: uid.into(),
            interface_blocks: Vec::new(),
        }
    }

    /// Add an interface block
    pub fn with_block(mut self, block: InterfaceBlock) -> Self {
        self.interface_blocks.push(block);
        self
    }

    /// Total register count: the sum of datapoint counts over every interface block
    pub fn total_register_count(&self) -> usize {
        self.interface_blocks
            .iter()
            .flat_map(|block| block.datapoints.iter())
            .map(|dp| dp.dp_count)
            .sum()
    }
}
