/*!
 * Action dispatcher state machine.
 *
 * The dispatcher owns the device registry. It takes one request at a time,
 * moves from `Idle` into the busy state of the request's kind, waits for the
 * completion probe (re-checking on a backoff schedule until the request's
 * budget runs out), executes the action and reports the outcome to the host
 * exactly once before returning to `Idle`.
 *
 * Bridge publishes share the request's budget. A publish that fails is only
 * logged; one still pending when the budget runs out fails the request.
 */
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use regbridge_core::types::ResultCode;
use regbridge_core::utils::{duration_to_millis, with_timeout, Backoff};
use regbridge_devices::{
    DatapointDescriptor, DeviceDescriptor, DeviceError, DeviceRecord, DeviceRegistry, ProtocolBridge,
    ReadValue, RecordHandle, WriteValue,
};

use crate::action::{Action, ActionKind, ActionRequest};
use crate::error::{Error, Result};
use crate::host::{route_report, ActionReport, HostResults};
use crate::probe::{AlwaysDone, CompletionProbe};

/// Column holding the scale factor in a datapoint's unrecognized columns
pub const SCALE_COLUMN: &str = "TestMultiplier";

/// State of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Waiting for the next request
    Idle,
    /// Resolving a request of the given kind
    Busy(ActionKind),
}

/// Result of one probe-and-execute step
#[derive(Debug)]
pub enum Step {
    /// The probe reported busy; check again later
    Busy,
    /// The action ran to an outcome
    Complete(Result<Option<ReadValue>>),
}

/// Executes queued actions against the device registry
#[derive(Debug)]
pub struct ActionDispatcher {
    registry: DeviceRegistry,
    devices: HashMap<String, RecordHandle>,
    bridge: Option<ProtocolBridge>,
    probe: Box<dyn CompletionProbe>,
    host: Arc<dyn HostResults>,
    retry: Backoff,
    state: DispatcherState,
    completed: u64,
}

impl ActionDispatcher {
    /// Create a dispatcher for at most `max_devices` devices, with an
    /// always-done probe and no bridge
    pub fn new(max_devices: usize, host: Arc<dyn HostResults>) -> Self {
        Self {
            registry: DeviceRegistry::new(max_devices),
            devices: HashMap::new(),
            bridge: None,
            probe: Box::new(AlwaysDone),
            host,
            retry: Backoff::default(),
            state: DispatcherState::Idle,
            completed: 0,
        }
    }

    /// Use a different completion probe
    pub fn with_probe(mut self, probe: Box<dyn CompletionProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Mirror reads and writes through a bridge and accept its events
    pub fn with_bridge(mut self, bridge: ProtocolBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Use a different schedule for busy re-checks
    pub fn with_retry(mut self, retry: Backoff) -> Self {
        self.retry = retry;
        self
    }

    /// Current state
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Number of requests resolved so far
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// The device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// The bridge, when enabled
    pub fn bridge(&self) -> Option<&ProtocolBridge> {
        self.bridge.as_ref()
    }

    /// Record of the device with the given host handle
    pub fn record_for(&self, device_handle: &str) -> Option<&DeviceRecord> {
        self.devices
            .get(device_handle)
            .and_then(|handle| self.registry.get(*handle))
    }

    /// Resolve one request: wait for the probe within the request's budget,
    /// execute and report
    ///
    /// Returns the report handed to the host, or `None` for event requests.
    pub async fn dispatch(&mut self, request: ActionRequest) -> Option<ActionReport> {
        let started = Instant::now();
        let deadline = started + request.timeout;
        let mut backoff = self.retry.clone();
        backoff.reset();
        self.begin(&request);

        let outcome = loop {
            match self.step(&request, deadline).await {
                Step::Complete(outcome) => break outcome,
                Step::Busy => {
                    let elapsed = started.elapsed();
                    if elapsed >= request.timeout {
                        warn!(
                            "{} {} still busy after {:?}, giving up",
                            request.kind(),
                            request.id,
                            elapsed
                        );
                        break Err(Error::timeout(format!(
                            "{} {} exceeded its {} ms budget",
                            request.kind(),
                            request.id,
                            duration_to_millis(request.timeout)
                        )));
                    }
                    let wait = backoff
                        .next_sleep()
                        .max(Duration::from_millis(1))
                        .min(request.timeout - elapsed);
                    debug!("{} {} busy, checking again in {:?}", request.kind(), request.id, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        };

        self.finish(request, outcome)
    }

    /// Enter the busy state of the request's kind
    pub fn begin(&mut self, request: &ActionRequest) {
        debug!("Dispatching {} {}", request.kind(), request.id);
        self.state = DispatcherState::Busy(request.kind());
    }

    /// Consult the probe and, once it reports done, execute the action
    ///
    /// Bridge publishes made by the action must finish before `deadline`.
    pub async fn step(&mut self, request: &ActionRequest, deadline: Instant) -> Step {
        let kind = request.kind();
        if kind.is_reported() && !self.probe.is_done(kind) {
            return Step::Busy;
        }
        Step::Complete(self.execute(&request.action, deadline).await)
    }

    /// Report the outcome, release the request and return to `Idle`
    pub fn finish(&mut self, request: ActionRequest, outcome: Result<Option<ReadValue>>) -> Option<ActionReport> {
        self.state = DispatcherState::Idle;
        self.completed += 1;

        let kind = request.kind();
        if !kind.is_reported() {
            if let Err(e) = outcome {
                warn!("Event {} failed: {}", request.id, e);
            }
            return None;
        }

        let (code, error, value) = match outcome {
            Ok(value) => (ResultCode::Success, None, value),
            Err(e) => {
                warn!("{} {} failed: {}", kind, request.id, e);
                (e.result_code(), Some(e.to_string()), None)
            }
        };
        let context = match &request.action {
            Action::DatapointRead { context, .. } => *context,
            _ => None,
        };
        let report = ActionReport {
            request_id: request.id.clone(),
            kind,
            device_handle: request
                .action
                .device()
                .map(|device| device.handle.clone())
                .unwrap_or_default(),
            datapoint: request.action.datapoint().map(|dp| dp.name.clone()),
            code,
            error,
            value,
            context,
        };

        if code.is_success() {
            info!("{} {} for device {} succeeded", kind, request.id, report.device_handle);
        }
        route_report(self.host.as_ref(), &report);
        Some(report)
    }

    async fn execute(&mut self, action: &Action, deadline: Instant) -> Result<Option<ReadValue>> {
        match action {
            Action::DeviceCreate { device, args } => self.create_device(device, args.as_deref()),
            Action::DeviceDelete { device } => self.delete_device(device),
            Action::DeviceReplace { device, .. } => self.replace_device(device),
            Action::DeviceProvision { device, args } => {
                info!(
                    "Provisioned device {} (args: {})",
                    device.uid,
                    args.as_deref().unwrap_or("none")
                );
                Ok(None)
            }
            Action::DeviceDeprovision { device } => {
                info!("Deprovisioned device {}", device.uid);
                Ok(None)
            }
            Action::DatapointCreate {
                device,
                datapoint,
                columns,
            } => self.create_datapoint(device, datapoint, columns.as_deref()),
            Action::DatapointRead {
                device, datapoint, ..
            } => self.read_datapoint(device, datapoint, deadline).await.map(Some),
            Action::DatapointWrite {
                device,
                datapoint,
                value,
                priority,
                relinquish,
            } => {
                debug!(
                    "Write to {} at priority {} (relinquish: {})",
                    datapoint.name, priority, relinquish
                );
                self.write_datapoint(device, datapoint, value, deadline)
                    .await
                    .map(|_| None)
            }
            Action::Event { topic, payload } => {
                match &self.bridge {
                    Some(bridge) => {
                        bridge.on_event_message(&mut self.registry, topic, payload);
                    }
                    None => warn!("Dropping event on {}: bridge disabled", topic),
                }
                Ok(None)
            }
        }
    }

    fn lookup(&self, device: &DeviceDescriptor) -> Result<RecordHandle> {
        self.devices
            .get(&device.handle)
            .copied()
            .filter(|handle| self.registry.contains(*handle))
            .ok_or_else(|| Error::not_found(format!("device {} ({})", device.uid, device.handle)))
    }

    fn create_device(&mut self, device: &DeviceDescriptor, args: Option<&str>) -> Result<Option<ReadValue>> {
        if device.handle.is_empty() {
            return Err(Error::dispatch(format!("device {} has no host handle", device.uid)));
        }
        if self.devices.contains_key(&device.handle) {
            info!("Device {} already exists", device.uid);
            return Ok(None);
        }

        let total = device.total_register_count();
        let record = DeviceRecord::new(device.uid.clone(), device.handle.clone(), total)?;
        let handle = self.registry.insert(record)?;
        self.devices.insert(device.handle.clone(), handle);

        info!(
            "Created device {} with {} registers ({} of {} devices)",
            device.uid,
            total,
            self.registry.len(),
            self.registry.max_devices()
        );
        if let Some(args) = args {
            debug!("Creation args for {}: {}", device.uid, args);
        }
        Ok(None)
    }

    fn delete_device(&mut self, device: &DeviceDescriptor) -> Result<Option<ReadValue>> {
        let handle = self.lookup(device)?;
        self.devices.remove(&device.handle);
        let record = self.registry.remove(handle)?;
        info!(
            "Deleted device {} and its {} bindings ({} devices left)",
            record.uid(),
            record.bound_count(),
            self.registry.len()
        );
        Ok(None)
    }

    fn replace_device(&mut self, device: &DeviceDescriptor) -> Result<Option<ReadValue>> {
        if device.uid.is_empty() {
            return Err(Error::Device(DeviceError::InvalidId("empty replacement id".to_string())));
        }
        let handle = self.lookup(device)?;
        let record = self
            .registry
            .get_mut(handle)
            .ok_or_else(|| Error::not_found(format!("device {}", device.uid)))?;
        info!("Replacing device {} with {}", record.uid(), device.uid);
        record.set_uid(device.uid.clone());
        Ok(None)
    }

    fn create_datapoint(
        &mut self,
        device: &DeviceDescriptor,
        datapoint: &DatapointDescriptor,
        columns: Option<&str>,
    ) -> Result<Option<ReadValue>> {
        let handle = self.lookup(device)?;
        let record = self
            .registry
            .get_mut(handle)
            .ok_or_else(|| Error::not_found(format!("device {}", device.uid)))?;
        let outcome = record.bind_datapoint(datapoint)?;
        debug!("Datapoint {} of {}: {:?}", datapoint.name, device.uid, outcome);

        let binding = record
            .binding_mut(&datapoint.name)
            .ok_or_else(|| Error::dispatch(format!("datapoint {} lost its binding", datapoint.name)))?;
        match scale_column(columns) {
            Ok(raw) => {
                let scale = binding.set_scale_factor(&raw);
                debug!("Datapoint {} scale factor {}", datapoint.name, scale.value);
            }
            Err(reason) => warn!(
                "Configuration error for datapoint {}: {}, scale factor stays {}",
                datapoint.name, reason, binding.scale_factor
            ),
        }
        Ok(None)
    }

    async fn read_datapoint(
        &mut self,
        device: &DeviceDescriptor,
        datapoint: &DatapointDescriptor,
        deadline: Instant,
    ) -> Result<ReadValue> {
        let handle = self.lookup(device)?;
        let record = self
            .registry
            .get(handle)
            .ok_or_else(|| Error::not_found(format!("device {}", device.uid)))?;
        let binding = record.binding(&datapoint.name).ok_or_else(|| {
            Error::Device(DeviceError::binding(format!(
                "datapoint {} of {} was never created",
                datapoint.name, device.uid
            )))
        })?;

        if let Some(bridge) = &self.bridge {
            let what = format!("read poll for {}", datapoint.name);
            publish_before(deadline, &what, bridge.publish_read(record, binding.address)).await?;
        }

        let value = record.cell(binding.cell_index())?.get().ok_or_else(|| {
            Error::Device(DeviceError::NoValue(format!(
                "register {} of device {}",
                binding.address, device.uid
            )))
        })?;
        let read = datapoint.decode_read(value, binding.scale_factor)?;
        debug!("Read {} = {:?}", datapoint.name, read);
        Ok(read)
    }

    async fn write_datapoint(
        &mut self,
        device: &DeviceDescriptor,
        datapoint: &DatapointDescriptor,
        value: &WriteValue,
        deadline: Instant,
    ) -> Result<Value> {
        let handle = self.lookup(device)?;
        let record = self
            .registry
            .get_mut(handle)
            .ok_or_else(|| Error::not_found(format!("device {}", device.uid)))?;
        let binding = record.binding(&datapoint.name).cloned().ok_or_else(|| {
            Error::Device(DeviceError::binding(format!(
                "datapoint {} of {} was never created",
                datapoint.name, device.uid
            )))
        })?;

        let json = datapoint.encode_write(value)?;
        record.cell_mut(binding.cell_index())?.set(json.clone());
        debug!("Wrote {} = {}", datapoint.name, json);

        if let Some(bridge) = &self.bridge {
            let what = format!("write of {}", datapoint.name);
            publish_before(deadline, &what, bridge.publish_write(record, binding.address, &json)).await?;
        }
        Ok(json)
    }
}

/// Await a bridge publish until `deadline`
///
/// A failed publish is logged and ignored; a publish still pending at the
/// deadline is a timeout.
async fn publish_before<F>(deadline: Instant, what: &str, publish: F) -> Result<()>
where
    F: Future<Output = std::result::Result<(), DeviceError>>,
{
    let left = deadline.saturating_duration_since(Instant::now());
    let published = with_timeout(left, async {
        publish
            .await
            .map_err(|e| regbridge_core::error::Error::other(e.to_string()))
    })
    .await;
    match published {
        Ok(()) => Ok(()),
        Err(e) if e.is_timeout() => {
            warn!("{} still pending at the deadline, abandoning it", what);
            Err(Error::timeout(format!("{} did not complete in time", what)))
        }
        Err(e) => {
            warn!("{} not published: {}", what, e);
            Ok(())
        }
    }
}

/// Raw scale factor text from a datapoint's unrecognized columns
fn scale_column(columns: Option<&str>) -> std::result::Result<String, String> {
    let columns = columns.ok_or_else(|| "no column data".to_string())?;
    let parsed: Value =
        serde_json::from_str(columns).map_err(|e| format!("columns are not valid JSON: {}", e))?;
    match parsed.get(SCALE_COLUMN) {
        Some(Value::String(raw)) => Ok(raw.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("{} holds {}, not a number", SCALE_COLUMN, other)),
        None => Err(format!("{} column missing", SCALE_COLUMN)),
    }
}
