//! Drives the dispatcher through an in-memory broker: creates a device,
//! writes and reads a datapoint, feeds an event back and prints every
//! message the bridge published.
//!
//! Run with `RUST_LOG=debug cargo run --example loopback`.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use regbridge_core::config::ConfigBuilder;
use regbridge_core::logging;
use regbridge_devices::{DatapointDescriptor, DatapointKind, DeviceDescriptor, InterfaceBlock, MemoryPublisher};
use regbridge_engine::{CollectingHost, DriverBuilder, ReadContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = ConfigBuilder::new()
        .with_environment_prefix("REGBRIDGE")
        .build()
        .context("loading configuration")?;
    config.mqtt.enabled = false;
    logging::init_from_config(&config.logging)?;

    let host = Arc::new(CollectingHost::new());
    let publisher = Arc::new(MemoryPublisher::new());
    let driver = DriverBuilder::new(config)
        .with_host(host.clone())
        .with_publisher(publisher.clone())
        .build()
        .await?;
    let client = driver.client();

    let boiler = DeviceDescriptor::new("host-boiler", "BOILER-01")
        .with_block(InterfaceBlock::new("setpoints").with_datapoint("registers", 4));
    let setpoint = DatapointDescriptor::new("setpoint", 0, DatapointKind::Numeric);
    let label = DatapointDescriptor::new("label", 3, DatapointKind::Ascii);

    client.on_device_create(1u64, boiler.clone(), None);
    client.on_datapoint_create(2u64, boiler.clone(), setpoint.clone(), Some(r#"{"TestMultiplier":"2"}"#.into()));
    client.on_datapoint_create(3u64, boiler.clone(), label.clone(), None);
    client.on_datapoint_write(4u64, boiler.clone(), setpoint.clone(), 21.5, 16, false);
    client.on_datapoint_write_ex(5u64, boiler.clone(), label.clone(), "kitchen", 16, false);
    client.on_datapoint_read(6u64, boiler.clone(), setpoint.clone());
    client.enqueue_event(
        format!("{}/ev/dev/BOILER-01/reg/0", driver.config().topic_prefix()),
        Bytes::from_static(b"30"),
    )?;
    client.on_datapoint_read_ex(7u64, boiler.clone(), setpoint, ReadContext(1));
    client.on_datapoint_read_ex(8u64, boiler.clone(), label, ReadContext(2));
    client.on_device_delete(9u64, boiler);

    let dispatcher = driver.shutdown().await?;

    for report in host.reports() {
        println!(
            "{:>20} {:>3} {:?} value={:?} error={:?}",
            report.kind, report.request_id, report.code, report.value, report.error
        );
    }
    for message in publisher.published() {
        println!("published {} <- {}", message.topic, message.payload_text());
    }
    println!("{} devices left", dispatcher.registry().len());
    Ok(())
}
