/*!
 * Broker transport abstraction.
 *
 * The bridge talks to the broker only through [`RegisterPublisher`]. The
 * rumqttc-backed implementation lives in `protocols::mqtt`;
 * [`MemoryPublisher`] records traffic in memory for loopback setups and tests.
 */
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, Result};

/// Delivery guarantee of a subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged delivery
    AtLeastOnce,
    /// Assured single delivery
    ExactlyOnce,
}

impl QoS {
    /// QoS for a numeric level
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(DeviceError::Configuration(format!("QoS level {} is not 0, 1 or 2", other))),
        }
    }
}

/// Publish and subscribe capability of a broker client
#[async_trait]
pub trait RegisterPublisher: fmt::Debug + Send + Sync {
    /// Subscribe to a topic filter
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()>;

    /// Publish a payload
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()>;
}

/// A message captured by [`MemoryPublisher`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Topic
    pub topic: String,
    /// Payload bytes
    pub payload: Bytes,
    /// QoS requested
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
}

impl PublishedMessage {
    /// Payload as UTF-8 text, lossily decoded
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Publisher that keeps every subscription and publish in memory
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<PublishedMessage>>,
}

impl MemoryPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters subscribed so far
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    /// Messages published so far
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RegisterPublisher for MemoryPublisher {
    async fn subscribe(&self, filter: &str, _qos: QoS) -> Result<()> {
        self.subscriptions
            .lock()
            .map_err(|_| DeviceError::protocol("subscription list poisoned"))?
            .push(filter.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()> {
        self.published
            .lock()
            .map_err(|_| DeviceError::protocol("publish log poisoned"))?
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
            });
        Ok(())
    }
}
