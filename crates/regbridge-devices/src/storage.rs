/*!
 * Per-device register storage.
 *
 * A [`DeviceRecord`] owns one [`ValueCell`] per register address. Datapoints
 * are bound to cells by address, so a read datapoint and a write datapoint
 * sharing an address see the same value.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use regbridge_core::types::DeviceUid;

use crate::datapoint::DatapointDescriptor;
use crate::device::{DeviceError, Result};

/// A register value shared by every datapoint bound to its address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueCell(Option<Value>);

impl ValueCell {
    /// Current value, if any
    pub fn get(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    /// Replace the value
    pub fn set(&mut self, value: Value) {
        self.0 = Some(value);
    }

    /// Drop the value
    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Whether the cell holds no value
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Outcome of parsing a scale factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactor {
    /// Adopted factor, never zero
    pub value: f64,
    /// The text was not entirely a number
    pub malformed: bool,
}

/// Parse a scale factor the way `strtod` does: the longest numeric prefix
/// wins, anything after it marks the text as malformed, and a zero or
/// missing number becomes 1.
pub fn parse_scale_factor(raw: &str) -> ScaleFactor {
    let text = raw.trim_start();
    let candidate_len = text
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);

    let mut parsed = None;
    for end in (1..=candidate_len).rev() {
        if let Ok(value) = text[..end].parse::<f64>() {
            parsed = Some((value, end));
            break;
        }
    }

    let (value, consumed) = parsed.unwrap_or((0.0, 0));
    let malformed = consumed == 0 || !text[consumed..].trim().is_empty();
    let value = if value == 0.0 || !value.is_finite() {
        1.0
    } else {
        value
    };

    ScaleFactor { value, malformed }
}

/// Binding of one datapoint to a register cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointBinding {
    /// Datapoint name
    pub name: String,
    /// Register address, also the index of the bound cell
    pub address: u32,
    /// Multiplier applied to numeric reads
    pub scale_factor: f64,
}

impl DatapointBinding {
    /// Index of the bound cell
    pub fn cell_index(&self) -> usize {
        self.address as usize
    }

    /// Parse and adopt a scale factor; a malformed value is reported but still adopted
    pub fn set_scale_factor(&mut self, raw: &str) -> ScaleFactor {
        let scale = parse_scale_factor(raw);
        if scale.malformed {
            warn!(
                "Scale factor '{}' of datapoint {} is malformed, using {}",
                raw, self.name, scale.value
            );
        }
        self.scale_factor = scale.value;
        scale
    }
}

/// Whether a bind created a new binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The datapoint was bound now
    Bound,
    /// The datapoint was already bound; nothing changed
    AlreadyBound,
}

/// Storage of one device
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    uid: DeviceUid,
    handle: String,
    created_at: DateTime<Utc>,
    total_register_count: usize,
    cells: Vec<ValueCell>,
    bindings: Vec<DatapointBinding>,
}

impl DeviceRecord {
    /// Create a record with `total_register_count` empty cells
    ///
    /// Storage is reserved up front; when that fails nothing is created.
    pub fn new<S: Into<String>>(uid: DeviceUid, handle: S, total_register_count: usize) -> Result<Self> {
        let mut cells = Vec::new();
        cells.try_reserve_exact(total_register_count).map_err(|e| {
            DeviceError::Allocation(format!("{} cells for device {}: {}", total_register_count, uid, e))
        })?;
        cells.resize(total_register_count, ValueCell::default());

        let mut bindings = Vec::new();
        bindings.try_reserve_exact(total_register_count).map_err(|e| {
            DeviceError::Allocation(format!(
                "{} bindings for device {}: {}",
                total_register_count, uid, e
            ))
        })?;

        Ok(Self {
            uid,
            handle: handle.into(),
            created_at: Utc::now(),
            total_register_count,
            cells,
            bindings,
        })
    }

    /// Unique id
    pub fn uid(&self) -> &DeviceUid {
        &self.uid
    }

    /// Rewrite the unique id in place; cells and bindings are kept
    pub fn set_uid(&mut self, uid: DeviceUid) {
        self.uid = uid;
    }

    /// Host handle
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of registers fixed at creation
    pub fn total_register_count(&self) -> usize {
        self.total_register_count
    }

    /// Number of bound datapoints
    pub fn bound_count(&self) -> usize {
        self.bindings.len()
    }

    /// Bind a datapoint to its register cell
    ///
    /// Binding an already bound datapoint is a no-op. A fresh binding needs a
    /// free binding slot and an address inside the device; an empty target
    /// cell is seeded from the datapoint's default.
    pub fn bind_datapoint(&mut self, datapoint: &DatapointDescriptor) -> Result<BindOutcome> {
        if self.binding(&datapoint.name).is_some() {
            return Ok(BindOutcome::AlreadyBound);
        }
        if self.bindings.len() >= self.total_register_count {
            return Err(DeviceError::binding(format!(
                "device {} has no free binding for datapoint {} ({} of {} used)",
                self.uid,
                datapoint.name,
                self.bindings.len(),
                self.total_register_count
            )));
        }
        let index = datapoint.address as usize;
        if index >= self.total_register_count {
            return Err(DeviceError::binding(format!(
                "address {} of datapoint {} is outside device {} ({} registers)",
                datapoint.address, datapoint.name, self.uid, self.total_register_count
            )));
        }

        if self.cells[index].is_empty() {
            let seed = datapoint.seed_value()?;
            debug!(
                "Seeding register {} of device {} with {}",
                index, self.uid, seed
            );
            self.cells[index].set(seed);
        }

        self.bindings.push(DatapointBinding {
            name: datapoint.name.clone(),
            address: datapoint.address,
            scale_factor: 1.0,
        });
        Ok(BindOutcome::Bound)
    }

    /// Binding of a datapoint
    pub fn binding(&self, name: &str) -> Option<&DatapointBinding> {
        self.bindings.iter().find(|binding| binding.name == name)
    }

    /// Mutable binding of a datapoint
    pub fn binding_mut(&mut self, name: &str) -> Option<&mut DatapointBinding> {
        self.bindings.iter_mut().find(|binding| binding.name == name)
    }

    /// All bindings, in bind order
    pub fn bindings(&self) -> &[DatapointBinding] {
        &self.bindings
    }

    /// Cell at a register address
    pub fn cell(&self, register: usize) -> Result<&ValueCell> {
        let uid = &self.uid;
        self.cells
            .get(register)
            .ok_or_else(|| DeviceError::not_found(format!("register {} of device {}", register, uid)))
    }

    /// Mutable cell at a register address
    pub fn cell_mut(&mut self, register: usize) -> Result<&mut ValueCell> {
        let uid = &self.uid;
        self.cells
            .get_mut(register)
            .ok_or_else(|| DeviceError::not_found(format!("register {} of device {}", register, uid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::{DatapointKind, DefaultValue};
    use serde_json::json;

    fn record(registers: usize) -> DeviceRecord {
        DeviceRecord::new(DeviceUid::new("D1"), "h1", registers).unwrap()
    }

    #[test]
    fn test_bindings_alias_one_cell() {
        let mut device = record(3);
        let read = DatapointDescriptor::new("temp_read", 1, DatapointKind::Numeric);
        let write = DatapointDescriptor::new("temp_write", 1, DatapointKind::Numeric);

        assert_eq!(device.bind_datapoint(&read).unwrap(), BindOutcome::Bound);
        assert_eq!(device.bind_datapoint(&write).unwrap(), BindOutcome::Bound);

        let index = device.binding("temp_write").unwrap().cell_index();
        device.cell_mut(index).unwrap().set(json!(42));

        let read_index = device.binding("temp_read").unwrap().cell_index();
        assert_eq!(device.cell(read_index).unwrap().get(), Some(&json!(42)));
    }

    #[test]
    fn test_bind_is_idempotent() {
        let mut device = record(2);
        let dp = DatapointDescriptor::new("sp", 0, DatapointKind::Numeric);

        assert_eq!(device.bind_datapoint(&dp).unwrap(), BindOutcome::Bound);
        assert_eq!(device.bind_datapoint(&dp).unwrap(), BindOutcome::AlreadyBound);
        assert_eq!(device.bound_count(), 1);
    }

    #[test]
    fn test_bind_rejects_out_of_range_and_full() {
        let mut device = record(1);
        let outside = DatapointDescriptor::new("far", 1, DatapointKind::Numeric);
        assert!(matches!(device.bind_datapoint(&outside), Err(DeviceError::Binding(_))));

        device
            .bind_datapoint(&DatapointDescriptor::new("a", 0, DatapointKind::Numeric))
            .unwrap();
        let second = DatapointDescriptor::new("b", 0, DatapointKind::Numeric);
        assert!(matches!(device.bind_datapoint(&second), Err(DeviceError::Binding(_))));
        assert_eq!(device.bound_count(), 1);
    }

    #[test]
    fn test_seed_does_not_overwrite_existing_value() {
        let mut device = record(2);
        device.cell_mut(0).unwrap().set(json!(5));

        let dp = DatapointDescriptor::new("sp", 0, DatapointKind::Numeric)
            .with_default(DefaultValue::Number(9.0));
        device.bind_datapoint(&dp).unwrap();
        assert_eq!(device.cell(0).unwrap().get(), Some(&json!(5)));

        let fresh = DatapointDescriptor::new("pv", 1, DatapointKind::Numeric);
        device.bind_datapoint(&fresh).unwrap();
        assert_eq!(device.cell(1).unwrap().get(), Some(&json!(0)));
    }

    #[test]
    fn test_parse_scale_factor() {
        assert_eq!(parse_scale_factor("2.5"), ScaleFactor { value: 2.5, malformed: false });
        assert_eq!(parse_scale_factor("0"), ScaleFactor { value: 1.0, malformed: false });
        assert_eq!(parse_scale_factor("  10x"), ScaleFactor { value: 10.0, malformed: true });
        assert_eq!(parse_scale_factor("abc"), ScaleFactor { value: 1.0, malformed: true });
        assert_eq!(parse_scale_factor(""), ScaleFactor { value: 1.0, malformed: true });
        assert_eq!(parse_scale_factor("1e2"), ScaleFactor { value: 100.0, malformed: false });
        assert_eq!(parse_scale_factor("-0.5"), ScaleFactor { value: -0.5, malformed: false });
    }

    #[test]
    fn test_set_scale_factor_adopts_coerced_value() {
        let mut device = record(1);
        device
            .bind_datapoint(&DatapointDescriptor::new("sp", 0, DatapointKind::Numeric))
            .unwrap();

        let binding = device.binding_mut("sp").unwrap();
        let scale = binding.set_scale_factor("0.0kg");
        assert!(scale.malformed);
        assert_eq!(binding.scale_factor, 1.0);

        binding.set_scale_factor("2");
        assert_eq!(device.binding("sp").unwrap().scale_factor, 2.0);
    }

    #[test]
    fn test_replace_uid_keeps_values() {
        let mut device = record(1);
        device.cell_mut(0).unwrap().set(json!("on"));
        device.set_uid(DeviceUid::new("D9"));

        assert_eq!(device.uid(), &DeviceUid::new("D9"));
        assert_eq!(device.cell(0).unwrap().get(), Some(&json!("on")));
        assert!(device.cell(1).is_err());
    }
}
