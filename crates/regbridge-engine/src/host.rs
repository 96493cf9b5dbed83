/*!
 * Result reporting towards the host engine.
 *
 * The embedding application implements [`HostResults`]; the dispatcher calls
 * exactly one of its methods per completed action.
 */
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use regbridge_core::types::{RequestId, ResultCode};
use regbridge_devices::ReadValue;

use crate::action::{ActionKind, ReadContext};

/// Outcome of one action, as handed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    /// Host correlation id
    pub request_id: RequestId,
    /// Kind of the completed action
    pub kind: ActionKind,
    /// Host handle of the device
    pub device_handle: String,
    /// Datapoint name, for datapoint actions
    pub datapoint: Option<String>,
    /// Result code
    pub code: ResultCode,
    /// Failure reason, when the code is not success
    pub error: Option<String>,
    /// Value read, for successful reads
    pub value: Option<ReadValue>,
    /// Host context of a read
    pub context: Option<ReadContext>,
}

/// Result callbacks of the host engine, one per action kind
pub trait HostResults: fmt::Debug + Send + Sync {
    /// A device creation completed
    fn device_create_result(&self, report: &ActionReport);

    /// A device deletion completed
    fn device_delete_result(&self, report: &ActionReport);

    /// A device replacement completed
    fn device_replace_result(&self, report: &ActionReport);

    /// A device provisioning completed
    fn device_provision_result(&self, report: &ActionReport);

    /// A device deprovisioning completed
    fn device_deprovision_result(&self, report: &ActionReport);

    /// A datapoint creation completed
    fn datapoint_create_result(&self, report: &ActionReport);

    /// A datapoint read completed; `report.value` holds the value on success
    fn datapoint_read_result(&self, report: &ActionReport);

    /// A datapoint write completed
    fn datapoint_write_result(&self, report: &ActionReport);
}

/// Send a report to the callback matching its kind
///
/// Returns `false` for kinds that are not reported.
pub fn route_report(host: &dyn HostResults, report: &ActionReport) -> bool {
    match report.kind {
        ActionKind::DeviceCreate => host.device_create_result(report),
        ActionKind::DeviceDelete => host.device_delete_result(report),
        ActionKind::DeviceReplace => host.device_replace_result(report),
        ActionKind::DeviceProvision => host.device_provision_result(report),
        ActionKind::DeviceDeprovision => host.device_deprovision_result(report),
        ActionKind::DatapointCreate => host.datapoint_create_result(report),
        ActionKind::DatapointRead => host.datapoint_read_result(report),
        ActionKind::DatapointWrite => host.datapoint_write_result(report),
        ActionKind::Event => return false,
    }
    true
}

/// Host that only logs results
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHost;

impl LoggingHost {
    fn log(report: &ActionReport) {
        info!(
            "{} {} for device {}: {}",
            report.kind, report.request_id, report.device_handle, report.code
        );
    }
}

impl HostResults for LoggingHost {
    fn device_create_result(&self, report: &ActionReport) {
        Self::log(report)
    }

    fn device_delete_result(&self, report: &ActionReport) {
        Self::log(report)
    }

    fn device_replace_result(&self, report: &ActionReport) {
        Self::log(report)
    }

    fn device_provision_result(&self, report: &ActionReport) {
        Self::log(report)
    }

    fn device_deprovision_result(&self, report: &ActionReport) {
        Self::log(report)
    }

    fn datapoint_create_result(&self, report: &ActionReport) {
        Self::log(report)
    }

    fn datapoint_read_result(&self, report: &ActionReport) {
        Self::log(report)
    }

    fn datapoint_write_result(&self, report: &ActionReport) {
        Self::log(report)
    }
}

/// Host that keeps every report, in arrival order
#[derive(Debug, Default)]
pub struct CollectingHost {
    reports: Mutex<Vec<(ActionKind, ActionReport)>>,
}

impl CollectingHost {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far
    pub fn reports(&self) -> Vec<ActionReport> {
        self.reports
            .lock()
            .map(|reports| reports.iter().map(|(_, report)| report.clone()).collect())
            .unwrap_or_default()
    }

    /// Reports received for one request id
    pub fn reports_for(&self, request_id: &RequestId) -> Vec<ActionReport> {
        self.reports()
            .into_iter()
            .filter(|report| &report.request_id == request_id)
            .collect()
    }

    /// Kinds of the callbacks invoked so far, in order
    pub fn callbacks(&self) -> Vec<ActionKind> {
        self.reports
            .lock()
            .map(|reports| reports.iter().map(|(kind, _)| *kind).collect())
            .unwrap_or_default()
    }

    fn push(&self, callback: ActionKind, report: &ActionReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((callback, report.clone()));
        }
    }
}

impl HostResults for CollectingHost {
    fn device_create_result(&self, report: &ActionReport) {
        self.push(ActionKind::DeviceCreate, report)
    }

    fn device_delete_result(&self, report: &ActionReport) {
        self.push(ActionKind::DeviceDelete, report)
    }

    fn device_replace_result(&self, report: &ActionReport) {
        self.push(ActionKind::DeviceReplace, report)
    }

    fn device_provision_result(&self, report: &ActionReport) {
        self.push(ActionKind::DeviceProvision, report)
    }

    fn device_deprovision_result(&self, report: &ActionReport) {
        self.push(ActionKind::DeviceDeprovision, report)
    }

    fn datapoint_create_result(&self, report: &ActionReport) {
        self.push(ActionKind::DatapointCreate, report)
    }

    fn datapoint_read_result(&self, report: &ActionReport) {
        self.push(ActionKind::DatapointRead, report)
    }

    fn datapoint_write_result(&self, report: &ActionReport) {
        self.push(ActionKind::DatapointWrite, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(kind: ActionKind) -> ActionReport {
        ActionReport {
            request_id: RequestId::from(1u64),
            kind,
            device_handle: "h1".to_string(),
            datapoint: None,
            code: ResultCode::Success,
            error: None,
            value: None,
            context: None,
        }
    }

    #[test]
    fn test_route_report_hits_matching_callback() {
        let host = CollectingHost::new();
        for kind in [
            ActionKind::DeviceCreate,
            ActionKind::DeviceDelete,
            ActionKind::DeviceReplace,
            ActionKind::DeviceProvision,
            ActionKind::DeviceDeprovision,
            ActionKind::DatapointCreate,
            ActionKind::DatapointRead,
            ActionKind::DatapointWrite,
        ] {
            assert!(route_report(&host, &report(kind)));
        }
        assert!(!route_report(&host, &report(ActionKind::Event)));

        let callbacks = host.callbacks();
        assert_eq!(callbacks.len(), 8);
        let reports = host.reports();
        assert!(callbacks.iter().zip(reports.iter()).all(|(cb, r)| *cb == r.kind));
    }

    #[test]
    fn test_logging_host_accepts_reports() {
        assert!(route_report(&LoggingHost, &report(ActionKind::DatapointRead)));
    }
}
