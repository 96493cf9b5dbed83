/*!
 * Datapoint descriptors and value conversion.
 *
 * The host engine exposes each datapoint with a type class, an optional
 * default, an optional enumeration table and an optional invalid marker. This
 * module turns host values into the JSON stored in value cells and back.
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::device::{DeviceError, Result};

/// Label the host uses for a datapoint's "invalid" marker
pub const INVALID_LABEL: &str = "INVALID";

/// Type class of a datapoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatapointKind {
    /// Scalar or enumerated value, exchanged with the host as a number
    Numeric,
    /// Character string
    Ascii,
    /// Structured value, exchanged with the host as JSON text
    Native,
}

/// Default value declared by the host for a datapoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Numeric default
    Number(f64),
    /// String default
    Text(String),
    /// Structured default, as JSON text
    Native(String),
}

/// One row of an enumeration table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumEntry {
    /// Numeric code
    pub value: i32,
    /// Label stored in the cell
    pub label: String,
}

/// Value written by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteValue {
    /// Numeric write
    Number(f64),
    /// Text write (ascii, native JSON text or an enumeration label)
    Text(String),
}

/// Value handed back to the host by a read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReadValue {
    /// Scaled numeric value
    Number(f64),
    /// Text value
    Text(String),
}

/// Host-side description of a datapoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointDescriptor {
    /// Datapoint name, unique within its device
    pub name: String,
    /// Register address within the device
    pub address: u32,
    /// Type class
    pub kind: DatapointKind,
    /// Declared default
    #[serde(default)]
    pub default: Option<DefaultValue>,
    /// Enumeration table; empty for plain numbers
    #[serde(default)]
    pub enum_map: Vec<EnumEntry>,
    /// Value reported when the cell holds the invalid marker
    #[serde(default)]
    pub invalid_value: Option<f64>,
}

impl DatapointDescriptor {
    /// Create a descriptor with no default or enumeration
    pub fn new<S: Into<String>>(name: S, address: u32, kind: DatapointKind) -> Self {
        Self {
            name: name.into(),
            address,
            kind,
            default: None,
            enum_map: Vec::new(),
            invalid_value: None,
        }
    }

    /// Set the declared default
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Add an enumeration entry
    pub fn with_enum<S: Into<String>>(mut self, value: i32, label: S) -> Self {
        self.enum_map.push(EnumEntry {
            value,
            label: label.into(),
        });
        self
    }

    /// Set the value reported for the invalid marker
    pub fn with_invalid_value(mut self, value: f64) -> Self {
        self.invalid_value = Some(value);
        self
    }

    /// Whether the datapoint has an enumeration table
    pub fn is_enumerated(&self) -> bool {
        !self.enum_map.is_empty()
    }

    /// Enumeration label for a numeric code
    pub fn label_for(&self, value: f64) -> Option<&str> {
        if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
            return None;
        }
        let code = value as i32;
        self.enum_map
            .iter()
            .find(|entry| entry.value == code)
            .map(|entry| entry.label.as_str())
    }

    /// Numeric code for an enumeration label, compared case-insensitively
    pub fn code_for(&self, label: &str) -> Option<i32> {
        self.enum_map
            .iter()
            .find(|entry| entry.label.eq_ignore_ascii_case(label))
            .map(|entry| entry.value)
    }

    /// Numeric default, or zero when none is declared
    pub fn default_number(&self) -> f64 {
        match self.default {
            Some(DefaultValue::Number(n)) => n,
            _ => 0.0,
        }
    }

    /// Value a fresh cell is seeded with when this datapoint is bound
    pub fn seed_value(&self) -> Result<Value> {
        match &self.default {
            None => Ok(Value::from(0)),
            Some(DefaultValue::Text(text)) => Ok(Value::String(text.clone())),
            Some(DefaultValue::Native(text)) => serde_json::from_str(text).map_err(|e| {
                DeviceError::conversion(format!(
                    "default of datapoint {} is not valid JSON: {}",
                    self.name, e
                ))
            }),
            Some(DefaultValue::Number(n)) => self.number_to_json(*n),
        }
    }

    /// JSON form of a host number: the enumeration label (null when the code
    /// is unknown) or the number itself
    pub fn number_to_json(&self, value: f64) -> Result<Value> {
        if self.is_enumerated() {
            return Ok(self
                .label_for(value)
                .map(|label| Value::String(label.to_string()))
                .unwrap_or(Value::Null));
        }
        number_value(value)
    }

    /// Host number for a JSON cell value
    ///
    /// A string is the exact invalid marker (when an invalid value is
    /// declared) or an enumeration label. Unknown labels of an enumerated
    /// datapoint fall back to the declared default; any other string fails.
    pub fn json_to_number(&self, value: &Value) -> Result<f64> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| DeviceError::conversion(format!("{} is not representable", n))),
            Value::String(text) => {
                if let Some(invalid) = self.invalid_value {
                    if text == INVALID_LABEL {
                        return Ok(invalid);
                    }
                }
                if !self.is_enumerated() {
                    return Err(DeviceError::conversion(format!(
                        "datapoint {} holds text '{}' where a number is expected",
                        self.name, text
                    )));
                }
                if let Some(code) = self.code_for(text) {
                    return Ok(f64::from(code));
                }
                debug!(
                    "Label '{}' unknown for datapoint {}, using default",
                    text, self.name
                );
                Ok(self.default_number())
            }
            other => Err(DeviceError::conversion(format!(
                "datapoint {} cannot hold {} as a number",
                self.name, other
            ))),
        }
    }

    /// Convert a host write into the JSON stored in the cell
    pub fn encode_write(&self, value: &WriteValue) -> Result<Value> {
        match (self.kind, value) {
            (DatapointKind::Ascii, WriteValue::Text(text)) => Ok(Value::String(text.clone())),
            (DatapointKind::Ascii, WriteValue::Number(n)) => Ok(Value::String(n.to_string())),
            (DatapointKind::Native, WriteValue::Text(text)) => {
                serde_json::from_str(text).map_err(|e| {
                    DeviceError::conversion(format!(
                        "write to datapoint {} is not valid JSON: {}",
                        self.name, e
                    ))
                })
            }
            (DatapointKind::Native, WriteValue::Number(n)) => number_value(*n),
            (DatapointKind::Numeric, WriteValue::Number(n)) => self.number_to_json(*n),
            (DatapointKind::Numeric, WriteValue::Text(text)) => {
                if let Some(code) = self.code_for(text) {
                    return self.number_to_json(f64::from(code));
                }
                let parsed = text.trim().parse::<f64>().map_err(|_| {
                    DeviceError::conversion(format!(
                        "'{}' is neither a label nor a number for datapoint {}",
                        text, self.name
                    ))
                })?;
                self.number_to_json(parsed)
            }
        }
    }

    /// Convert a cell value into what the host receives, applying the scale factor
    pub fn decode_read(&self, value: &Value, scale_factor: f64) -> Result<ReadValue> {
        match self.kind {
            DatapointKind::Numeric => Ok(ReadValue::Number(self.json_to_number(value)? * scale_factor)),
            DatapointKind::Ascii | DatapointKind::Native => match value {
                Value::String(text) => Ok(ReadValue::Text(text.clone())),
                other => Ok(ReadValue::Text(other.to_string())),
            },
        }
    }
}

/// JSON number for `value`, integral values stored as integers
pub fn number_value(value: f64) -> Result<Value> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Ok(Value::from(value as i64));
    }
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| DeviceError::conversion(format!("{} is not a finite number", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mode() -> DatapointDescriptor {
        DatapointDescriptor::new("mode", 0, DatapointKind::Numeric)
            .with_enum(0, "Off")
            .with_enum(1, "Heat")
            .with_enum(2, "Cool")
    }

    #[test]
    fn test_seed_value_follows_default() {
        let plain = DatapointDescriptor::new("sp", 1, DatapointKind::Numeric);
        assert_eq!(plain.seed_value().unwrap(), json!(0));

        let numeric = plain.clone().with_default(DefaultValue::Number(21.5));
        assert_eq!(numeric.seed_value().unwrap(), json!(21.5));

        let label = mode().with_default(DefaultValue::Number(1.0));
        assert_eq!(label.seed_value().unwrap(), json!("Heat"));

        let unmatched = mode().with_default(DefaultValue::Number(9.0));
        assert_eq!(unmatched.seed_value().unwrap(), Value::Null);

        let text = DatapointDescriptor::new("tag", 2, DatapointKind::Ascii)
            .with_default(DefaultValue::Text("boiler".into()));
        assert_eq!(text.seed_value().unwrap(), json!("boiler"));

        let native = DatapointDescriptor::new("cfg", 3, DatapointKind::Native)
            .with_default(DefaultValue::Native(r#"{"a":[1,2]}"#.into()));
        assert_eq!(native.seed_value().unwrap(), json!({"a": [1, 2]}));

        let broken = DatapointDescriptor::new("cfg", 3, DatapointKind::Native)
            .with_default(DefaultValue::Native("{".into()));
        assert!(broken.seed_value().is_err());
    }

    #[test]
    fn test_enum_labels_are_case_insensitive() {
        let dp = mode();
        assert_eq!(dp.json_to_number(&json!("cool")).unwrap(), 2.0);
        assert_eq!(dp.json_to_number(&json!("HEAT")).unwrap(), 1.0);
        assert_eq!(dp.json_to_number(&json!("unknown")).unwrap(), 0.0);
        assert!(dp.json_to_number(&json!(true)).is_err());
        assert!(dp.json_to_number(&Value::Null).is_err());
    }

    #[test]
    fn test_invalid_marker_is_exact() {
        let dp = DatapointDescriptor::new("flow", 0, DatapointKind::Numeric).with_invalid_value(-1.0);
        assert_eq!(dp.json_to_number(&json!("INVALID")).unwrap(), -1.0);
        assert!(dp.json_to_number(&json!("invalid")).is_err());

        let undeclared = DatapointDescriptor::new("flow", 0, DatapointKind::Numeric);
        assert!(undeclared.json_to_number(&json!("INVALID")).is_err());
    }

    #[test]
    fn test_text_in_plain_numeric_cell_fails() {
        let dp = DatapointDescriptor::new("sp", 1, DatapointKind::Numeric)
            .with_default(DefaultValue::Number(5.0));
        assert!(dp.json_to_number(&json!("garbage")).is_err());
        assert!(dp.json_to_number(&json!("12")).is_err());
        assert!(dp.decode_read(&json!("garbage"), 1.0).is_err());
        assert_eq!(dp.json_to_number(&json!(12)).unwrap(), 12.0);
    }

    #[test]
    fn test_unknown_label_uses_default() {
        let dp = mode().with_default(DefaultValue::Number(2.0));
        assert_eq!(dp.json_to_number(&json!("warm")).unwrap(), 2.0);
    }

    #[test]
    fn test_encode_write_per_kind() {
        let ascii = DatapointDescriptor::new("tag", 0, DatapointKind::Ascii);
        assert_eq!(ascii.encode_write(&WriteValue::Text("x".into())).unwrap(), json!("x"));

        let native = DatapointDescriptor::new("cfg", 0, DatapointKind::Native);
        assert_eq!(
            native.encode_write(&WriteValue::Text(r#"{"on":true}"#.into())).unwrap(),
            json!({"on": true})
        );
        assert!(native.encode_write(&WriteValue::Text("{on".into())).is_err());

        let numeric = DatapointDescriptor::new("sp", 0, DatapointKind::Numeric);
        assert_eq!(numeric.encode_write(&WriteValue::Number(42.0)).unwrap(), json!(42));
        assert_eq!(numeric.encode_write(&WriteValue::Number(0.5)).unwrap(), json!(0.5));

        let dp = mode();
        assert_eq!(dp.encode_write(&WriteValue::Number(2.0)).unwrap(), json!("Cool"));
        assert_eq!(dp.encode_write(&WriteValue::Number(7.0)).unwrap(), Value::Null);
        assert_eq!(dp.encode_write(&WriteValue::Text("heat".into())).unwrap(), json!("Heat"));
        assert!(dp.encode_write(&WriteValue::Text("warm".into())).is_err());
    }

    #[test]
    fn test_decode_read_scales() {
        let dp = DatapointDescriptor::new("sp", 0, DatapointKind::Numeric);
        assert_eq!(dp.decode_read(&json!(42), 2.0).unwrap(), ReadValue::Number(84.0));
        assert_eq!(dp.decode_read(&json!(50), 3.0).unwrap(), ReadValue::Number(150.0));
        assert_eq!(dp.decode_read(&json!(-1), 1.0).unwrap(), ReadValue::Number(-1.0));

        let native = DatapointDescriptor::new("cfg", 0, DatapointKind::Native);
        assert_eq!(
            native.decode_read(&json!({"a": 1}), 1.0).unwrap(),
            ReadValue::Text(r#"{"a":1}"#.into())
        );
        let ascii = DatapointDescriptor::new("tag", 0, DatapointKind::Ascii);
        assert_eq!(
            ascii.decode_read(&json!("boiler"), 1.0).unwrap(),
            ReadValue::Text("boiler".into())
        );
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(3.0).unwrap(), json!(3));
        assert_eq!(number_value(-2.25).unwrap(), json!(-2.25));
        assert!(number_value(f64::NAN).is_err());
    }
}
