//! reading.rs
//! Reading events as emitted by the meter driver and carried through the channel.
//! - `observed_at` is not part of the event: the consumer stamps it at dequeue time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Short identifier of a measured quantity (ECHONET Lite EPC, e.g. `E7`).
/// Normalised to trimmed upper case so `e7` and `E7` name the same property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PropertyCode(String);

impl PropertyCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PropertyCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<&str> for PropertyCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<PropertyCode> for String {
    fn from(code: PropertyCode) -> Self {
        code.0
    }
}

impl fmt::Display for PropertyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Untyped payload as handed over by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Text(s) => f.write_str(s),
            RawValue::Integer(v) => write!(f, "{}", v),
            RawValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Integer(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

/// Outcome of one acquisition attempt for one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingStatus {
    Ok,
    Failed(String),
}

impl ReadingStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReadingStatus::Ok)
    }
}

/// A single measurement on its way from the producer to the consumer loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingEvent {
    pub source_tag: String,
    pub property_code: PropertyCode,
    pub raw_value: RawValue,
    pub status: ReadingStatus,
}

impl ReadingEvent {
    /// Successful reading.
    pub fn ok(
        source_tag: impl Into<String>,
        property_code: impl Into<PropertyCode>,
        raw_value: impl Into<RawValue>,
    ) -> Self {
        Self {
            source_tag: source_tag.into(),
            property_code: property_code.into(),
            raw_value: raw_value.into(),
            status: ReadingStatus::Ok,
        }
    }

    /// Failed acquisition; the raw value is kept empty.
    pub fn failed(
        source_tag: impl Into<String>,
        property_code: impl Into<PropertyCode>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_tag: source_tag.into(),
            property_code: property_code.into(),
            raw_value: RawValue::Text(String::new()),
            status: ReadingStatus::Failed(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_code_normalised() {
        assert_eq!(PropertyCode::new(" e7 "), PropertyCode::new("E7"));
        assert_eq!(PropertyCode::from("d3").as_str(), "D3");
    }

    #[test]
    fn test_property_code_deserialises_normalised() {
        let codes: Vec<PropertyCode> = serde_yaml::from_str("[e0, E3]").unwrap();
        assert_eq!(codes, vec![PropertyCode::new("E0"), PropertyCode::new("E3")]);
    }

    #[test]
    fn test_raw_value_display() {
        assert_eq!(RawValue::from("1234").to_string(), "1234");
        assert_eq!(RawValue::from(42i64).to_string(), "42");
        assert_eq!(RawValue::from(5678.9).to_string(), "5678.9");
    }

    #[test]
    fn test_failed_event_status() {
        let ev = ReadingEvent::failed("meter-01", "E7", "no response");
        assert!(!ev.status.is_ok());
        assert_eq!(ev.status, ReadingStatus::Failed("no response".into()));
        assert!(ReadingEvent::ok("meter-01", "E7", "1").status.is_ok());
    }
}
