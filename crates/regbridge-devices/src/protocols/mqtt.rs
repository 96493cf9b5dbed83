/*!
 * MQTT transport for regbridge.
 *
 * [`MqttPublisher`] implements [`RegisterPublisher`] over a rumqttc
 * `AsyncClient`; requests never wait for room in the client channel, a full
 * channel fails the request instead. [`MqttEventLoop`] drives the client's event loop, hands
 * every inbound publish to a callback and restores subscriptions after a
 * reconnect.
 */
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use tracing::{debug, error, info, warn};

use regbridge_core::config::Config;
use regbridge_core::utils::Backoff;

use crate::device::{DeviceError, Result};
use crate::protocol::{QoS, RegisterPublisher};

/// Connection settings for the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Capacity of the client request channel
    pub channel_capacity: usize,
}

impl MqttSettings {
    /// Settings from the `[mqtt]` configuration section
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
            client_id: config.client_id(),
            keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
            channel_capacity: config.mqtt.channel_capacity,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options
    }
}

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Create a client and its not yet running event loop
pub fn connect(settings: &MqttSettings) -> (MqttPublisher, MqttEventLoop) {
    info!(
        "Connecting to MQTT broker at {}:{} as {}",
        settings.host, settings.port, settings.client_id
    );
    let (client, eventloop) = AsyncClient::new(settings.options(), settings.channel_capacity);
    let publisher = MqttPublisher {
        client: client.clone(),
    };
    let eventloop = MqttEventLoop {
        eventloop,
        client,
        resubscribe: Vec::new(),
        reconnect: Backoff::new(Duration::from_millis(100), Duration::from_secs(30), 2.0),
    };
    (publisher, eventloop)
}

/// rumqttc-backed publisher
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttPublisher").finish_non_exhaustive()
    }
}

#[async_trait]
impl RegisterPublisher for MqttPublisher {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        self.client
            .try_subscribe(filter, to_rumqttc(qos))
            .map_err(|e| DeviceError::protocol(format!("subscribe to {} failed: {}", filter, e)))
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, to_rumqttc(qos), retain, payload.to_vec())
            .map_err(|e| DeviceError::protocol(format!("publish to {} failed: {}", topic, e)))
    }
}

/// Event loop of a client created by [`connect`]
pub struct MqttEventLoop {
    eventloop: EventLoop,
    client: AsyncClient,
    resubscribe: Vec<(String, QoS)>,
    reconnect: Backoff,
}

impl fmt::Debug for MqttEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttEventLoop")
            .field("resubscribe", &self.resubscribe)
            .finish_non_exhaustive()
    }
}

impl MqttEventLoop {
    /// Subscribe to `filter` again after every reconnect
    pub fn resubscribe_on_reconnect<S: Into<String>>(mut self, filter: S, qos: QoS) -> Self {
        self.resubscribe.push((filter.into(), qos));
        self
    }

    /// Run the event loop on a background task
    ///
    /// `on_publish` receives the topic and payload of every inbound publish.
    /// Connection errors are retried with exponential backoff until the task
    /// is aborted.
    pub fn spawn<F>(self, mut on_publish: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(String, Bytes) + Send + 'static,
    {
        let MqttEventLoop {
            mut eventloop,
            client,
            resubscribe,
            mut reconnect,
        } = self;

        tokio::spawn(async move {
            let mut connected_before = false;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(
                            "Received {} bytes on {}",
                            publish.payload.len(),
                            publish.topic
                        );
                        on_publish(publish.topic.clone(), publish.payload.clone());
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        reconnect.reset();
                        if connected_before {
                            info!("Reconnected to MQTT broker");
                            for (filter, qos) in &resubscribe {
                                if let Err(e) = client.try_subscribe(filter.as_str(), to_rumqttc(*qos)) {
                                    error!("Failed to restore subscription {}: {}", filter, e);
                                }
                            }
                        } else {
                            info!("Connected to MQTT broker");
                            connected_before = true;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let delay = reconnect.next_sleep();
                        warn!("MQTT connection error: {}, retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}
