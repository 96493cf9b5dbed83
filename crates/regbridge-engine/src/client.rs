/*!
 * Host-facing entry points.
 *
 * Every callback the host engine makes only builds an [`ActionRequest`] and
 * tries to enqueue it. The returned code says whether the request was
 * accepted; the outcome arrives later through [`HostResults`].
 *
 * [`HostResults`]: crate::host::HostResults
 */
use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use regbridge_core::config::DispatcherConfig;
use regbridge_core::types::{RequestId, ResultCode};
use regbridge_devices::{DatapointDescriptor, DeviceDescriptor, WriteValue};

use crate::action::{Action, ActionRequest, ReadContext};
use crate::error::Result;
use crate::queue::ActionSender;

/// Cloneable handle the host uses to submit actions
#[derive(Debug, Clone)]
pub struct ActionClient {
    sender: ActionSender,
    normal_timeout: Duration,
    long_timeout: Duration,
}

impl ActionClient {
    /// Create a client for a queue, with the budgets of `config`
    pub fn new(sender: ActionSender, config: &DispatcherConfig) -> Self {
        Self {
            sender,
            normal_timeout: config.normal_timeout(),
            long_timeout: config.long_timeout(),
        }
    }

    /// Budget of datapoint requests
    pub fn normal_timeout(&self) -> Duration {
        self.normal_timeout
    }

    /// Budget of device lifecycle requests
    pub fn long_timeout(&self) -> Duration {
        self.long_timeout
    }

    /// Name of the queue requests go to
    pub fn queue_name(&self) -> &str {
        self.sender.name()
    }

    /// Create a device
    pub fn on_device_create<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        args: Option<String>,
    ) -> ResultCode {
        self.submit(id, self.long_timeout, Action::DeviceCreate { device, args })
    }

    /// Provision a device
    pub fn on_device_provision<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        args: Option<String>,
    ) -> ResultCode {
        self.submit(id, self.long_timeout, Action::DeviceProvision { device, args })
    }

    /// Deprovision a device
    pub fn on_device_deprovision<I: Into<RequestId>>(&self, id: I, device: DeviceDescriptor) -> ResultCode {
        self.submit(id, self.long_timeout, Action::DeviceDeprovision { device })
    }

    /// Give a device a new unique id; `device.uid` carries the new id
    pub fn on_device_replace<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        args: Option<String>,
    ) -> ResultCode {
        self.submit(id, self.long_timeout, Action::DeviceReplace { device, args })
    }

    /// Delete a device
    pub fn on_device_delete<I: Into<RequestId>>(&self, id: I, device: DeviceDescriptor) -> ResultCode {
        self.submit(id, self.long_timeout, Action::DeviceDelete { device })
    }

    /// Create a datapoint; `columns` holds the unrecognized columns as JSON
    pub fn on_datapoint_create<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        datapoint: DatapointDescriptor,
        columns: Option<String>,
    ) -> ResultCode {
        self.submit(
            id,
            self.normal_timeout,
            Action::DatapointCreate {
                device,
                datapoint,
                columns,
            },
        )
    }

    /// Read a numeric datapoint
    pub fn on_datapoint_read<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        datapoint: DatapointDescriptor,
    ) -> ResultCode {
        self.submit(
            id,
            self.normal_timeout,
            Action::DatapointRead {
                device,
                datapoint,
                context: None,
            },
        )
    }

    /// Read any datapoint, handing `context` back with the result
    pub fn on_datapoint_read_ex<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        datapoint: DatapointDescriptor,
        context: ReadContext,
    ) -> ResultCode {
        self.submit(
            id,
            self.normal_timeout,
            Action::DatapointRead {
                device,
                datapoint,
                context: Some(context),
            },
        )
    }

    /// Write a number
    pub fn on_datapoint_write<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        datapoint: DatapointDescriptor,
        value: f64,
        priority: u8,
        relinquish: bool,
    ) -> ResultCode {
        self.write(id, device, datapoint, WriteValue::Number(value), priority, relinquish)
    }

    /// Write text: a label, an ascii string or a native JSON document
    pub fn on_datapoint_write_ex<I: Into<RequestId>, S: Into<String>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        datapoint: DatapointDescriptor,
        value: S,
        priority: u8,
        relinquish: bool,
    ) -> ResultCode {
        self.write(id, device, datapoint, WriteValue::Text(value.into()), priority, relinquish)
    }

    /// Queue an inbound broker message
    pub fn enqueue_event<S: Into<String>>(&self, topic: S, payload: Bytes) -> Result<()> {
        self.sender.try_enqueue(ActionRequest::new(
            RequestId::new(),
            self.normal_timeout,
            Action::Event {
                topic: topic.into(),
                payload,
            },
        ))
    }

    fn write<I: Into<RequestId>>(
        &self,
        id: I,
        device: DeviceDescriptor,
        datapoint: DatapointDescriptor,
        value: WriteValue,
        priority: u8,
        relinquish: bool,
    ) -> ResultCode {
        self.submit(
            id,
            self.normal_timeout,
            Action::DatapointWrite {
                device,
                datapoint,
                value,
                priority,
                relinquish,
            },
        )
    }

    fn submit<I: Into<RequestId>>(&self, id: I, timeout: Duration, action: Action) -> ResultCode {
        let request = ActionRequest::new(id.into(), timeout, action);
        let kind = request.kind();
        let id = request.id.clone();
        match self.sender.try_enqueue(request) {
            Ok(()) => ResultCode::Success,
            Err(e) => {
                warn!("{} {} not queued: {}", kind, id, e);
                e.result_code()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::queue::QueueNamespace;
    use regbridge_devices::DatapointKind;

    fn client(capacity: usize) -> (ActionClient, crate::queue::ActionReceiver) {
        let (tx, rx) = QueueNamespace::new().create("q", capacity).unwrap();
        (ActionClient::new(tx, &DispatcherConfig::default()), rx)
    }

    #[tokio::test]
    async fn test_budgets_follow_kind() {
        let (client, mut rx) = client(4);
        let device = DeviceDescriptor::new("h1", "D1");
        let datapoint = DatapointDescriptor::new("sp", 0, DatapointKind::Numeric);

        assert_eq!(client.on_device_create(1u64, device.clone(), None), ResultCode::Success);
        assert_eq!(
            client.on_datapoint_write_ex(2u64, device, datapoint, "ON", 16, false),
            ResultCode::Success
        );

        let create = rx.recv().await.unwrap();
        assert_eq!(create.timeout, Duration::from_millis(50_000));
        let write = rx.recv().await.unwrap();
        assert_eq!(write.kind(), ActionKind::DatapointWrite);
        assert_eq!(write.timeout, Duration::from_millis(30_000));
        assert!(matches!(
            write.action,
            Action::DatapointWrite { value: WriteValue::Text(ref text), priority: 16, .. } if text == "ON"
        ));
    }

    #[tokio::test]
    async fn test_full_queue_reports_busy() {
        let (client, _rx) = client(1);
        let device = DeviceDescriptor::new("h1", "D1");

        assert_eq!(client.on_device_provision(1u64, device.clone(), None), ResultCode::Success);
        assert_eq!(client.on_device_deprovision(2u64, device), ResultCode::Busy);
        assert!(client.enqueue_event("t", Bytes::new()).is_err());
    }

    #[test]
    fn test_closed_queue_reports_failure() {
        let (client, rx) = client(1);
        drop(rx);
        assert_eq!(
            client.on_device_delete(1u64, DeviceDescriptor::new("h1", "D1")),
            ResultCode::Failure
        );
    }

    #[tokio::test]
    async fn test_read_ex_carries_context() {
        let (client, mut rx) = client(2);
        let datapoint = DatapointDescriptor::new("name", 2, DatapointKind::Ascii);
        client.on_datapoint_read_ex(5u64, DeviceDescriptor::new("h1", "D1"), datapoint, ReadContext(11));

        let read = rx.recv().await.unwrap();
        assert!(matches!(read.action, Action::DatapointRead { context: Some(ReadContext(11)), .. }));
    }
}
