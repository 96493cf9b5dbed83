/*!
 * Broker transports for regbridge.
 */

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttEventLoop, MqttPublisher, MqttSettings};
