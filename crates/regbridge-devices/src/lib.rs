/*!
 * regbridge Devices
 *
 * Register storage for managed devices, the device registry, the register
 * topic codec and the bridge that mirrors register traffic onto a broker.
 */

#![warn(missing_docs)]

// Re-export core types
pub use regbridge_core::prelude;

pub mod bridge;
pub mod datapoint;
pub mod device;
pub mod protocol;
pub mod protocols;
pub mod registry;
pub mod storage;
pub mod topic;

pub use bridge::{EventOutcome, ProtocolBridge};
pub use datapoint::{DatapointDescriptor, DatapointKind, DefaultValue, EnumEntry, ReadValue, WriteValue};
pub use device::{DeviceDescriptor, DeviceError, InterfaceBlock, Result};
pub use protocol::{MemoryPublisher, PublishedMessage, QoS, RegisterPublisher};
pub use registry::{DeviceRegistry, RecordHandle};
pub use storage::{BindOutcome, DatapointBinding, DeviceRecord, ScaleFactor, ValueCell};
pub use topic::{RegisterTopic, TopicCategory, TopicScheme};

/// regbridge devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> std::result::Result<(), regbridge_core::error::Error> {
    tracing::info!("regbridge Devices {} initialized", VERSION);
    Ok(())
}

/// Broker transports compiled into this build
pub fn available_protocols() -> Vec<&'static str> {
    let mut protocols = vec!["memory"];

    #[cfg(feature = "mqtt")]
    protocols.push("mqtt");

    protocols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_protocols() {
        let protocols = available_protocols();
        assert!(protocols.contains(&"memory"));
        #[cfg(feature = "mqtt")]
        assert!(protocols.contains(&"mqtt"));
    }
}
