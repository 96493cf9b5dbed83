/*!
 * Driver context.
 *
 * [`DriverBuilder`] wires the action queue, the dispatcher, the worker task
 * and, when enabled, the broker connection. The resulting [`Driver`] owns all
 * of them; the host talks to it through [`Driver::client`].
 */
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use regbridge_core::config::{Config, SharedConfig};
use regbridge_core::utils::Backoff;
use regbridge_devices::{ProtocolBridge, QoS, RegisterPublisher, TopicScheme};

use crate::client::ActionClient;
use crate::dispatcher::ActionDispatcher;
use crate::error::{Error, Result};
use crate::host::{HostResults, LoggingHost};
use crate::probe::{AlwaysDone, CompletionProbe, SimulatedProbe};
use crate::queue::QueueNamespace;
use crate::worker::spawn_worker;

/// Builder for a [`Driver`]
#[derive(Debug)]
pub struct DriverBuilder {
    config: Config,
    host: Option<Arc<dyn HostResults>>,
    probe: Option<Box<dyn CompletionProbe>>,
    publisher: Option<Arc<dyn RegisterPublisher>>,
    namespace: Option<Arc<QueueNamespace>>,
}

impl DriverBuilder {
    /// Start from a configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            host: None,
            probe: None,
            publisher: None,
            namespace: None,
        }
    }

    /// Receive results through `host`; results are only logged otherwise
    pub fn with_host(mut self, host: Arc<dyn HostResults>) -> Self {
        self.host = Some(host);
        self
    }

    /// Use a specific completion probe instead of the configured one
    pub fn with_probe(mut self, probe: Box<dyn CompletionProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Bridge through `publisher` instead of connecting to the broker
    pub fn with_publisher(mut self, publisher: Arc<dyn RegisterPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Create the queue in a shared namespace
    pub fn with_namespace(mut self, namespace: Arc<QueueNamespace>) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Create the queue, start the worker and connect the bridge
    pub async fn build(self) -> Result<Driver> {
        let config = self.config;
        config.validate()?;

        let namespace = self.namespace.unwrap_or_default();
        let queue_name = config.queue_name();
        let (sender, receiver) = namespace.create(queue_name.clone(), config.dispatcher.queue_capacity)?;
        let queue_generation = sender.generation();
        let client = ActionClient::new(sender, &config.dispatcher);

        let host: Arc<dyn HostResults> = match self.host {
            Some(host) => host,
            None => Arc::new(LoggingHost),
        };
        let probe: Box<dyn CompletionProbe> = match self.probe {
            Some(probe) => probe,
            None if config.dispatcher.simulate_busy => Box::new(SimulatedProbe::new()),
            None => Box::new(AlwaysDone),
        };
        let mut dispatcher = ActionDispatcher::new(config.dispatcher.max_devices, host)
            .with_probe(probe)
            .with_retry(Backoff::from_millis(
                config.dispatcher.retry_initial_ms,
                config.dispatcher.retry_max_ms,
            ));

        let qos = QoS::from_level(config.mqtt.qos)?;
        let scheme = TopicScheme::new(config.topic_prefix());
        let mut event_loop = None;
        let publisher = match self.publisher {
            Some(publisher) => Some(publisher),
            None if config.mqtt.enabled => {
                let (publisher, task) = Driver::connect_mqtt(&config, &client, &scheme, qos)?;
                event_loop = Some(task);
                Some(publisher)
            }
            None => None,
        };

        if let Some(publisher) = publisher {
            let bridge = ProtocolBridge::new(scheme, publisher, qos);
            bridge.subscribe_events().await?;
            dispatcher = dispatcher.with_bridge(bridge);
        } else {
            info!("Broker bridge disabled");
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let worker = spawn_worker(receiver, dispatcher, shutdown_rx);

        info!(
            "Driver {} started on queue {}",
            config.general.driver_name, queue_name
        );
        Ok(Driver {
            config: SharedConfig::new(config),
            namespace,
            queue_name,
            queue_generation,
            client,
            shutdown: Some(shutdown),
            worker,
            event_loop,
        })
    }
}

/// A running driver
#[derive(Debug)]
pub struct Driver {
    config: SharedConfig,
    namespace: Arc<QueueNamespace>,
    queue_name: String,
    queue_generation: u64,
    client: ActionClient,
    shutdown: Option<oneshot::Sender<()>>,
    worker: JoinHandle<ActionDispatcher>,
    event_loop: Option<JoinHandle<()>>,
}

impl Driver {
    /// Handle for submitting actions
    pub fn client(&self) -> ActionClient {
        self.client.clone()
    }

    /// Configuration the driver was built from
    pub fn config(&self) -> &Config {
        self.config.get()
    }

    /// Name of the action queue
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Connect to the broker and forward inbound publishes as events
    ///
    /// Returns the publisher for the bridge and the event loop task.
    #[cfg(feature = "mqtt")]
    pub fn connect_mqtt(
        config: &Config,
        client: &ActionClient,
        scheme: &TopicScheme,
        qos: QoS,
    ) -> Result<(Arc<dyn RegisterPublisher>, JoinHandle<()>)> {
        use regbridge_devices::protocols::mqtt::{connect, MqttSettings};

        let (publisher, event_loop) = connect(&MqttSettings::from_config(config));
        let events = client.clone();
        let task = event_loop
            .resubscribe_on_reconnect(scheme.event_subscription(), qos)
            .spawn(move |topic, payload| {
                if let Err(e) = events.enqueue_event(topic.as_str(), payload) {
                    warn!("Event on {} not queued: {}", topic, e);
                }
            });
        let publisher: Arc<dyn RegisterPublisher> = Arc::new(publisher);
        Ok((publisher, task))
    }

    /// Connect to the broker and forward inbound publishes as events
    #[cfg(not(feature = "mqtt"))]
    pub fn connect_mqtt(
        _config: &Config,
        _client: &ActionClient,
        _scheme: &TopicScheme,
        _qos: QoS,
    ) -> Result<(Arc<dyn RegisterPublisher>, JoinHandle<()>)> {
        Err(Error::configuration(
            "mqtt.enabled is set but this build has no mqtt support",
        ))
    }

    /// Stop accepting requests, resolve the queued ones and stop the worker
    ///
    /// The queue name is unlinked unless another driver has recreated it in
    /// the meantime. Returns the dispatcher with the final registry.
    pub async fn shutdown(mut self) -> Result<ActionDispatcher> {
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
        if let Some(shutdown) = self.shutdown.take() {
            // the worker may already be gone
            let _ = shutdown.send(());
        }

        let dispatcher = (&mut self.worker)
            .await
            .map_err(|e| Error::other(format!("worker task failed: {}", e)))?;
        if !self.namespace.unlink_generation(&self.queue_name, self.queue_generation) {
            info!("Queue {} was recreated by another driver, leaving it linked", self.queue_name);
        }
        info!(
            "Driver {} stopped, {} devices left",
            self.config.get().general.driver_name,
            dispatcher.registry().len()
        );
        Ok(dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CollectingHost;
    use regbridge_core::types::ResultCode;
    use regbridge_devices::{DeviceDescriptor, MemoryPublisher};

    fn config() -> Config {
        let mut config = Config::default();
        config.general.driver_name = "unit".to_string();
        config.mqtt.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_build_without_bridge() {
        let namespace = Arc::new(QueueNamespace::new());
        let host = Arc::new(CollectingHost::new());
        let driver = DriverBuilder::new(config())
            .with_host(host.clone())
            .with_namespace(namespace.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(driver.queue_name(), "/dev_act_q_eti_unit");
        assert!(namespace.contains("/dev_act_q_eti_unit"));

        let client = driver.client();
        assert_eq!(
            client.on_device_create(1u64, DeviceDescriptor::new("h1", "D1"), None),
            ResultCode::Success
        );

        let dispatcher = driver.shutdown().await.unwrap();
        assert!(dispatcher.bridge().is_none());
        assert_eq!(dispatcher.registry().len(), 1);
        assert_eq!(host.reports().len(), 1);
        assert!(!namespace.contains("/dev_act_q_eti_unit"));
        assert_eq!(
            client.on_device_delete(2u64, DeviceDescriptor::new("h1", "D1")),
            ResultCode::Failure
        );
    }

    #[tokio::test]
    async fn test_publisher_gets_event_subscription() {
        let publisher = Arc::new(MemoryPublisher::new());
        let driver = DriverBuilder::new(config())
            .with_publisher(publisher.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(publisher.subscriptions(), vec!["eti/unit/ev/dev/+/reg/#".to_string()]);
        let dispatcher = driver.shutdown().await.unwrap();
        assert_eq!(dispatcher.bridge().unwrap().scheme().prefix(), "eti/unit");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.dispatcher.queue_capacity = 0;
        assert!(DriverBuilder::new(config).build().await.is_err());
    }
}
