/*!
 * Logging functionality for regbridge.
 *
 * This module provides tracing setup and span helpers so the worker, the
 * broker event loop and the host callbacks log in one consistent shape.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "regbridge_engine=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Initialize the logging system from the `[logging]` configuration section
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    if !config.json_format {
        return init_with_filter(&config.level);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(fmt::layer().json().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}

/// Create a new span for an operation
///
/// # Arguments
///
/// * `name` - The name of the operation
/// * `component` - The component performing the operation
pub fn operation_span(name: &str, component: &str) -> Span {
    tracing::info_span!("operation", name = %name, component = %component)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_named(span: &Span, expected: &str) -> bool {
        span.is_disabled() || span.metadata().map(|m| m.name()) == Some(expected)
    }

    #[test]
    fn test_init() {
        // Only the first subscriber in a process is installed
        let _ = init();
    }

    #[test]
    fn test_component_span() {
        let span = component_span("worker", Some("boiler"));
        assert!(is_named(&span, "component"));

        let span = component_span("worker", None);
        let _guard = span.enter();
        assert!(is_named(&span, "component"));
    }

    #[test]
    fn test_operation_span() {
        let span = operation_span("datapoint_read", "dispatcher");
        assert!(is_named(&span, "operation"));
    }
}
