/*!
 * Register topic codec.
 *
 * Topics have the shape `{prefix}/{category}/dev/{device}/reg/{register}`.
 */
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceError, Result};

const DEVICE_KEY: &str = "dev";
const REGISTER_KEY: &str = "reg";

/// Direction of a register topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicCategory {
    /// Poll for a register value
    Read,
    /// A value written by the host
    Write,
    /// A value reported by a device
    Event,
}

impl TopicCategory {
    /// Topic segment of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicCategory::Read => "rd",
            TopicCategory::Write => "wr",
            TopicCategory::Event => "ev",
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicCategory {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rd" => Ok(TopicCategory::Read),
            "wr" => Ok(TopicCategory::Write),
            "ev" => Ok(TopicCategory::Event),
            other => Err(DeviceError::topic(format!("unknown category '{}'", other))),
        }
    }
}

/// A parsed register topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTopic {
    /// Direction
    pub category: TopicCategory,
    /// Device unique id
    pub device: String,
    /// Register index
    pub register: u32,
}

/// Builds and parses topics under one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
}

impl TopicScheme {
    /// Create a scheme; surrounding slashes of the prefix are ignored
    pub fn new<S: AsRef<str>>(prefix: S) -> Self {
        Self {
            prefix: prefix.as_ref().trim_matches('/').to_string(),
        }
    }

    /// Prefix in front of every topic
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Topic of one register
    pub fn topic(&self, category: TopicCategory, device: &str, register: u32) -> Result<String> {
        if device.is_empty() || device.contains(['/', '+', '#']) {
            return Err(DeviceError::topic(format!(
                "device id '{}' cannot be used in a topic",
                device
            )));
        }
        Ok(format!(
            "{}/{}/{}/{}/{}/{}",
            self.prefix, category, DEVICE_KEY, device, REGISTER_KEY, register
        ))
    }

    /// Filter matching every event topic
    pub fn event_subscription(&self) -> String {
        format!(
            "{}/{}/{}/+/{}/#",
            self.prefix,
            TopicCategory::Event,
            DEVICE_KEY,
            REGISTER_KEY
        )
    }

    /// Parse a topic published under this prefix
    pub fn parse(&self, topic: &str) -> Result<RegisterTopic> {
        let rest = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                DeviceError::topic(format!("'{}' is not under prefix '{}'", topic, self.prefix))
            })?;

        let segments: Vec<&str> = rest.split('/').collect();
        let [category, device_key, device, register_key, register] = segments.as_slice() else {
            return Err(DeviceError::topic(format!(
                "'{}' does not have the form category/dev/id/reg/index",
                topic
            )));
        };

        let category = category.parse::<TopicCategory>()?;
        if *device_key != DEVICE_KEY || *register_key != REGISTER_KEY {
            return Err(DeviceError::topic(format!("'{}' lacks the dev/reg keys", topic)));
        }
        if device.is_empty() {
            return Err(DeviceError::topic(format!("'{}' has an empty device id", topic)));
        }
        let register = register.parse::<u32>().map_err(|_| {
            DeviceError::topic(format!("register '{}' in '{}' is not an index", register, topic))
        })?;

        Ok(RegisterTopic {
            category,
            device: device.to_string(),
            register,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_shape() {
        let scheme = TopicScheme::new("eti/boiler");
        assert_eq!(
            scheme.topic(TopicCategory::Read, "D1", 3).unwrap(),
            "eti/boiler/rd/dev/D1/reg/3"
        );
        assert_eq!(
            scheme.topic(TopicCategory::Write, "D1", 0).unwrap(),
            "eti/boiler/wr/dev/D1/reg/0"
        );
        assert_eq!(scheme.event_subscription(), "eti/boiler/ev/dev/+/reg/#");
        assert!(scheme.topic(TopicCategory::Read, "a/b", 0).is_err());
    }

    #[test]
    fn test_parse_event_topic() {
        let scheme = TopicScheme::new("/eti/boiler/");
        let parsed = scheme.parse("eti/boiler/ev/dev/D1/reg/12").unwrap();
        assert_eq!(
            parsed,
            RegisterTopic {
                category: TopicCategory::Event,
                device: "D1".to_string(),
                register: 12,
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed_topics() {
        let scheme = TopicScheme::new("eti/boiler");
        assert!(scheme.parse("eti/other/ev/dev/D1/reg/1").is_err());
        assert!(scheme.parse("eti/boiler/xx/dev/D1/reg/1").is_err());
        assert!(scheme.parse("eti/boiler/ev/device/D1/reg/1").is_err());
        assert!(scheme.parse("eti/boiler/ev/dev/D1/reg/one").is_err());
        assert!(scheme.parse("eti/boiler/ev/dev/D1/reg/-1").is_err());
        assert!(scheme.parse("eti/boiler/ev/dev/D1/reg").is_err());
        assert!(scheme.parse("eti/boiler/ev/dev/D1/reg/1/extra").is_err());
    }
}
