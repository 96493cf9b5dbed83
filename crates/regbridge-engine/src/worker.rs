/*!
 * The single worker draining an action queue.
 */
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, Instrument};

use regbridge_core::logging::{component_span, operation_span};

use crate::dispatcher::ActionDispatcher;
use crate::queue::ActionReceiver;

/// Spawn the worker task; it hands the dispatcher back when it stops
pub fn spawn_worker(
    receiver: ActionReceiver,
    dispatcher: ActionDispatcher,
    shutdown: oneshot::Receiver<()>,
) -> JoinHandle<ActionDispatcher> {
    let span = component_span("worker", Some(receiver.name()));
    tokio::spawn(run_worker(receiver, dispatcher, shutdown).instrument(span))
}

/// Resolve requests one at a time until the queue is closed and drained
///
/// A shutdown signal (or a dropped signal sender) closes the queue; requests
/// already queued are still resolved and reported.
pub async fn run_worker(
    mut receiver: ActionReceiver,
    mut dispatcher: ActionDispatcher,
    mut shutdown: oneshot::Receiver<()>,
) -> ActionDispatcher {
    info!("Worker on {} started", receiver.name());
    let mut closing = false;

    loop {
        tokio::select! {
            request = receiver.recv() => {
                let Some(request) = request else { break };
                let span = operation_span(request.kind().as_str(), receiver.name());
                dispatcher.dispatch(request).instrument(span).await;
            }
            _ = &mut shutdown, if !closing => {
                info!("Closing {}, draining queued requests", receiver.name());
                receiver.close();
                closing = true;
            }
        }
    }

    info!(
        "Worker on {} stopped after {} requests",
        receiver.name(),
        dispatcher.completed()
    );
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionRequest};
    use crate::host::CollectingHost;
    use crate::queue::QueueNamespace;
    use regbridge_core::types::{RequestId, ResultCode};
    use regbridge_devices::DeviceDescriptor;
    use std::sync::Arc;
    use std::time::Duration;

    fn create(n: u64, handle: &str) -> ActionRequest {
        ActionRequest::new(
            RequestId::from(n),
            Duration::from_millis(50),
            Action::DeviceCreate {
                device: DeviceDescriptor::new(handle, handle.to_uppercase()),
                args: None,
            },
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_worker_drains_before_stopping() {
        let namespace = QueueNamespace::new();
        let (tx, rx) = namespace.create("q", 8).unwrap();
        let host = Arc::new(CollectingHost::new());
        let (stop_tx, stop_rx) = oneshot::channel();

        for (n, handle) in ["a", "b", "c"].iter().enumerate() {
            tx.try_enqueue(create(n as u64, handle)).unwrap();
        }
        stop_tx.send(()).unwrap();

        let worker = spawn_worker(rx, ActionDispatcher::new(8, host.clone()), stop_rx);
        let dispatcher = worker.await.unwrap();

        assert_eq!(dispatcher.registry().len(), 3);
        let reports = host.reports();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.code == ResultCode::Success));
        assert!(tx.try_enqueue(create(9, "d")).is_err());
    }

    #[tokio::test]
    async fn test_dropped_signal_stops_worker() {
        let namespace = QueueNamespace::new();
        let (tx, rx) = namespace.create("q", 8).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let worker = spawn_worker(rx, ActionDispatcher::new(8, Arc::new(CollectingHost::new())), stop_rx);
        tx.try_enqueue(create(1, "a")).unwrap();
        drop(stop_tx);

        let dispatcher = worker.await.unwrap();
        assert_eq!(dispatcher.completed(), 1);
        assert!(tx.is_closed());
    }
}
