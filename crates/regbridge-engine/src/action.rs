/*!
 * Action requests carried by the action queue.
 *
 * Each host callback becomes one [`ActionRequest`]; the [`Action`] variant
 * carries exactly the payload its kind needs.
 */
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use regbridge_core::types::RequestId;
use regbridge_devices::{DatapointDescriptor, DeviceDescriptor, WriteValue};

/// Kind of an action; also names the dispatcher's busy state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Device creation
    DeviceCreate,
    /// Device deletion
    DeviceDelete,
    /// Device id replacement
    DeviceReplace,
    /// Device provisioning
    DeviceProvision,
    /// Device deprovisioning
    DeviceDeprovision,
    /// Datapoint creation
    DatapointCreate,
    /// Datapoint read
    DatapointRead,
    /// Datapoint write
    DatapointWrite,
    /// Inbound broker event; never reported to the host
    Event,
}

impl ActionKind {
    /// Whether the result of this kind goes back to the host
    pub fn is_reported(&self) -> bool {
        *self != ActionKind::Event
    }

    /// Short name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DeviceCreate => "device_create",
            ActionKind::DeviceDelete => "device_delete",
            ActionKind::DeviceReplace => "device_replace",
            ActionKind::DeviceProvision => "device_provision",
            ActionKind::DeviceDeprovision => "device_deprovision",
            ActionKind::DatapointCreate => "datapoint_create",
            ActionKind::DatapointRead => "datapoint_read",
            ActionKind::DatapointWrite => "datapoint_write",
            ActionKind::Event => "event",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque host context passed back with a read result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadContext(pub u64);

/// Work to do for one request
#[derive(Debug, Clone)]
pub enum Action {
    /// Create storage for a device
    DeviceCreate {
        /// Device
        device: DeviceDescriptor,
        /// Free-form creation arguments
        args: Option<String>,
    },
    /// Remove a device and its storage
    DeviceDelete {
        /// Device
        device: DeviceDescriptor,
    },
    /// Rewrite a device's unique id; `device.uid` is the new id
    DeviceReplace {
        /// Device
        device: DeviceDescriptor,
        /// Free-form replacement arguments
        args: Option<String>,
    },
    /// Provision a device
    DeviceProvision {
        /// Device
        device: DeviceDescriptor,
        /// Free-form provisioning arguments
        args: Option<String>,
    },
    /// Deprovision a device
    DeviceDeprovision {
        /// Device
        device: DeviceDescriptor,
    },
    /// Bind a datapoint and apply its column settings
    DatapointCreate {
        /// Device
        device: DeviceDescriptor,
        /// Datapoint
        datapoint: DatapointDescriptor,
        /// Columns the host did not recognize, as a JSON object
        columns: Option<String>,
    },
    /// Read a datapoint
    DatapointRead {
        /// Device
        device: DeviceDescriptor,
        /// Datapoint
        datapoint: DatapointDescriptor,
        /// Host context for the result
        context: Option<ReadContext>,
    },
    /// Write a datapoint
    DatapointWrite {
        /// Device
        device: DeviceDescriptor,
        /// Datapoint
        datapoint: DatapointDescriptor,
        /// Value written
        value: WriteValue,
        /// Write priority
        priority: u8,
        /// Relinquish the priority slot instead of writing
        relinquish: bool,
    },
    /// Message received on an event topic
    Event {
        /// Topic
        topic: String,
        /// Payload
        payload: Bytes,
    },
}

impl Action {
    /// Kind of this action
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::DeviceCreate { .. } => ActionKind::DeviceCreate,
            Action::DeviceDelete { .. } => ActionKind::DeviceDelete,
            Action::DeviceReplace { .. } => ActionKind::DeviceReplace,
            Action::DeviceProvision { .. } => ActionKind::DeviceProvision,
            Action::DeviceDeprovision { .. } => ActionKind::DeviceDeprovision,
            Action::DatapointCreate { .. } => ActionKind::DatapointCreate,
            Action::DatapointRead { .. } => ActionKind::DatapointRead,
            Action::DatapointWrite { .. } => ActionKind::DatapointWrite,
            Action::Event { .. } => ActionKind::Event,
        }
    }

    /// Device the action targets, if any
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        match self {
            Action::DeviceCreate { device, .. }
            | Action::DeviceDelete { device }
            | Action::DeviceReplace { device, .. }
            | Action::DeviceProvision { device, .. }
            | Action::DeviceDeprovision { device }
            | Action::DatapointCreate { device, .. }
            | Action::DatapointRead { device, .. }
            | Action::DatapointWrite { device, .. } => Some(device),
            Action::Event { .. } => None,
        }
    }

    /// Datapoint the action targets, if any
    pub fn datapoint(&self) -> Option<&DatapointDescriptor> {
        match self {
            Action::DatapointCreate { datapoint, .. }
            | Action::DatapointRead { datapoint, .. }
            | Action::DatapointWrite { datapoint, .. } => Some(datapoint),
            _ => None,
        }
    }

    /// Free-form arguments, if the kind carries them
    pub fn args(&self) -> Option<&str> {
        match self {
            Action::DeviceCreate { args, .. }
            | Action::DeviceReplace { args, .. }
            | Action::DeviceProvision { args, .. } => args.as_deref(),
            _ => None,
        }
    }
}

/// One queued request
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Host correlation id
    pub id: RequestId,
    /// Budget from first dequeue until the action fails with a timeout
    pub timeout: Duration,
    /// The work
    pub action: Action,
}

impl ActionRequest {
    /// Create a request
    pub fn new(id: RequestId, timeout: Duration, action: Action) -> Self {
        Self {
            id,
            timeout,
            action,
        }
    }

    /// Kind of the carried action
    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}
