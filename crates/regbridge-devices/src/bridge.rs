/*!
 * Protocol bridge between register cells and the broker.
 *
 * Reads are mirrored as polls on the read topic, writes as the written
 * value on the write topic. Event messages published by devices are folded
 * back into the matching cell.
 */
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::device::{DeviceError, Result};
use crate::protocol::{QoS, RegisterPublisher};
use crate::registry::DeviceRegistry;
use crate::storage::DeviceRecord;
use crate::topic::{TopicCategory, TopicScheme};

/// Payload of a read poll
pub const READ_POLL_PAYLOAD: &[u8] = b" ";

/// What an event message did to its cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventOutcome {
    /// Empty payload; the cell was emptied
    Cleared,
    /// The payload equals the stored value; nothing changed
    Unchanged,
    /// The cell now holds the payload
    Updated(Value),
}

/// Maps register activity onto broker topics
#[derive(Debug, Clone)]
pub struct ProtocolBridge {
    scheme: TopicScheme,
    publisher: Arc<dyn RegisterPublisher>,
    qos: QoS,
}

impl ProtocolBridge {
    /// Create a bridge publishing through `publisher`
    pub fn new(scheme: TopicScheme, publisher: Arc<dyn RegisterPublisher>, qos: QoS) -> Self {
        Self {
            scheme,
            publisher,
            qos,
        }
    }

    /// Topic scheme in use
    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Subscribe to every event topic under the prefix
    pub async fn subscribe_events(&self) -> Result<()> {
        let filter = self.scheme.event_subscription();
        self.publisher.subscribe(&filter, self.qos).await?;
        info!("Subscribed to {}", filter);
        Ok(())
    }

    /// Poll a register: a single-space payload on the read topic
    pub async fn publish_read(&self, record: &DeviceRecord, register: u32) -> Result<()> {
        let topic = self.register_topic(TopicCategory::Read, record, register)?;
        debug!("Publishing read poll on {}", topic);
        self.publisher
            .publish(&topic, Bytes::from_static(READ_POLL_PAYLOAD), self.qos, false)
            .await
    }

    /// Publish a written value as compact JSON on the write topic
    pub async fn publish_write(&self, record: &DeviceRecord, register: u32, value: &Value) -> Result<()> {
        let topic = self.register_topic(TopicCategory::Write, record, register)?;
        let payload = serde_json::to_vec(value)?;
        debug!("Publishing {} on {}", value, topic);
        self.publisher
            .publish(&topic, Bytes::from(payload), self.qos, false)
            .await
    }

    /// Fold an event message into the registry
    ///
    /// Messages that cannot be placed (wrong category, unknown device,
    /// register out of range, invalid JSON) return an error and leave the
    /// registry untouched.
    pub fn apply_event(&self, registry: &mut DeviceRegistry, topic: &str, payload: &[u8]) -> Result<EventOutcome> {
        let parsed = self.scheme.parse(topic)?;
        if parsed.category != TopicCategory::Event {
            return Err(DeviceError::topic(format!(
                "'{}' is a {} topic, not an event",
                topic, parsed.category
            )));
        }

        let handle = registry
            .find_by_uid(&parsed.device)
            .ok_or_else(|| DeviceError::not_found(format!("device {}", parsed.device)))?;
        let record = registry
            .get_mut(handle)
            .ok_or_else(|| DeviceError::not_found(format!("device {}", parsed.device)))?;
        let register = parsed.register as usize;
        if register >= record.total_register_count() {
            return Err(DeviceError::topic(format!(
                "register {} is outside device {} ({} registers)",
                parsed.register,
                parsed.device,
                record.total_register_count()
            )));
        }

        if payload.is_empty() {
            record.cell_mut(register)?.clear();
            debug!("Cleared register {} of device {}", register, parsed.device);
            return Ok(EventOutcome::Cleared);
        }

        let value: Value = serde_json::from_slice(payload).map_err(|e| {
            DeviceError::conversion(format!("event payload on {} is not JSON: {}", topic, e))
        })?;

        let cell = record.cell_mut(register)?;
        if cell.get().map_or(false, |current| same_value(current, &value)) {
            debug!("Register {} of device {} unchanged", register, parsed.device);
            return Ok(EventOutcome::Unchanged);
        }
        debug!(
            "Register {} of device {} updated to {}",
            register, parsed.device, value
        );
        cell.set(value.clone());
        Ok(EventOutcome::Updated(value))
    }

    /// [`apply_event`](Self::apply_event), logging and dropping messages that cannot be placed
    pub fn on_event_message(&self, registry: &mut DeviceRegistry, topic: &str, payload: &[u8]) -> Option<EventOutcome> {
        match self.apply_event(registry, topic, payload) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Dropping event on {}: {}", topic, e);
                None
            }
        }
    }

    fn register_topic(&self, category: TopicCategory, record: &DeviceRecord, register: u32) -> Result<String> {
        if register as usize >= record.total_register_count() {
            return Err(DeviceError::not_found(format!(
                "register {} of device {} ({} registers)",
                register,
                record.uid(),
                record.total_register_count()
            )));
        }
        self.scheme.topic(category, record.uid().as_str(), register)
    }
}

/// JSON equality where numbers compare by value, so `42` and `42.0` match
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).map_or(false, |y| same_value(x, y)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MemoryPublisher;
    use regbridge_core::types::DeviceUid;
    use serde_json::json;

    fn bridge() -> (ProtocolBridge, Arc<MemoryPublisher>) {
        let publisher = Arc::new(MemoryPublisher::new());
        let bridge = ProtocolBridge::new(
            TopicScheme::new("eti/test"),
            publisher.clone(),
            QoS::AtLeastOnce,
        );
        (bridge, publisher)
    }

    fn registry_with(uid: &str, registers: usize) -> DeviceRegistry {
        let mut registry = DeviceRegistry::new(4);
        registry
            .insert(DeviceRecord::new(DeviceUid::new(uid), "h1", registers).unwrap())
            .unwrap();
        registry
    }

    fn cell(registry: &DeviceRegistry, uid: &str, register: usize) -> Option<Value> {
        let handle = registry.find_by_uid(uid).unwrap();
        registry.get(handle).unwrap().cell(register).unwrap().get().cloned()
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let (bridge, publisher) = bridge();
        let registry = registry_with("D1", 3);
        let record = registry.iter().next().unwrap();

        bridge.subscribe_events().await.unwrap();
        bridge.publish_read(record, 1).await.unwrap();
        bridge.publish_write(record, 2, &json!({"sp": 21.5})).await.unwrap();
        assert!(bridge.publish_read(record, 3).await.is_err());

        assert_eq!(publisher.subscriptions(), vec!["eti/test/ev/dev/+/reg/#"]);
        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "eti/test/rd/dev/D1/reg/1");
        assert_eq!(published[0].payload_text(), " ");
        assert!(!published[0].retain);
        assert_eq!(published[1].topic, "eti/test/wr/dev/D1/reg/2");
        assert_eq!(published[1].payload_text(), r#"{"sp":21.5}"#);
    }

    #[test]
    fn test_event_updates_then_is_unchanged() {
        let (bridge, _) = bridge();
        let mut registry = registry_with("D1", 3);
        let topic = "eti/test/ev/dev/D1/reg/1";

        let first = bridge.apply_event(&mut registry, topic, br#"{"value":"7"}"#).unwrap();
        assert_eq!(first, EventOutcome::Updated(json!({"value": "7"})));

        let second = bridge.apply_event(&mut registry, topic, br#"{ "value" : "7" }"#).unwrap();
        assert_eq!(second, EventOutcome::Unchanged);
        assert_eq!(cell(&registry, "D1", 1), Some(json!({"value": "7"})));

        let cleared = bridge.apply_event(&mut registry, topic, b"").unwrap();
        assert_eq!(cleared, EventOutcome::Cleared);
        assert_eq!(cell(&registry, "D1", 1), None);
    }

    #[test_log::test]
    fn test_numerically_equal_event_is_unchanged() {
        let (bridge, _) = bridge();
        let mut registry = registry_with("D1", 3);
        let topic = "eti/test/ev/dev/D1/reg/0";

        assert_eq!(
            bridge.apply_event(&mut registry, topic, b"42").unwrap(),
            EventOutcome::Updated(json!(42))
        );
        assert_eq!(bridge.apply_event(&mut registry, topic, b"42.0").unwrap(), EventOutcome::Unchanged);
        assert_eq!(cell(&registry, "D1", 0), Some(json!(42)));

        bridge.apply_event(&mut registry, topic, br#"{"sp":[1,2.5]}"#).unwrap();
        assert_eq!(
            bridge.apply_event(&mut registry, topic, br#"{"sp":[1.0,2.5]}"#).unwrap(),
            EventOutcome::Unchanged
        );
        assert!(matches!(
            bridge.apply_event(&mut registry, topic, b"42.5").unwrap(),
            EventOutcome::Updated(_)
        ));
    }

    #[test]
    fn test_same_value() {
        assert!(same_value(&json!(1), &json!(1.0)));
        assert!(same_value(&json!({"a": [0, "x"]}), &json!({"a": [0.0, "x"]})));
        assert!(!same_value(&json!({"a": 1}), &json!({"b": 1})));
        assert!(!same_value(&json!([1]), &json!([1, 2])));
        assert!(!same_value(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_event_for_absent_device_is_dropped() {
        let (bridge, _) = bridge();
        let mut registry = registry_with("D2", 3);

        let outcome = bridge.on_event_message(
            &mut registry,
            "eti/test/ev/dev/D1/reg/1",
            br#"{"value":"7"}"#,
        );
        assert_eq!(outcome, None);
        assert_eq!(cell(&registry, "D2", 1), None);
    }

    #[test]
    fn test_malformed_events_are_rejected() {
        let (bridge, _) = bridge();
        let mut registry = registry_with("D1", 2);

        assert!(bridge.apply_event(&mut registry, "eti/test/wr/dev/D1/reg/1", b"1").is_err());
        assert!(bridge.apply_event(&mut registry, "eti/test/ev/dev/D1/reg/2", b"1").is_err());
        assert!(bridge.apply_event(&mut registry, "eti/test/ev/dev/D1/reg/x", b"1").is_err());
        assert!(bridge.apply_event(&mut registry, "eti/test/ev/dev/D1/reg/0", b"{oops").is_err());
        assert_eq!(cell(&registry, "D1", 0), None);
    }
}
