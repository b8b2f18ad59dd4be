//! record.rs
//! Long-format record: one row per (timestamp, property) pair.
//! Rows never reference each other, so a torn write costs a row, never the file's structure.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::acquisition::reading::PropertyCode;
use crate::persistence::coercion::{CoercedValue, TypedValue};

/// `observed_at` rendering: ISO-8601, microseconds, local offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// Column order of every destination file.
pub const HEADER: [&str; 5] = ["observed_at", "source_tag", "property_code", "data_id", "value"];

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub observed_at: DateTime<Local>,
    pub source_tag: String,
    pub property_code: PropertyCode,
    /// Reserved sub-key (e.g. per-channel breakdown); always empty for now.
    pub data_id: String,
    pub value: TypedValue,
}

impl Record {
    pub fn new(observed_at: DateTime<Local>, source_tag: impl Into<String>, coerced: CoercedValue) -> Self {
        Self {
            observed_at,
            source_tag: source_tag.into(),
            property_code: coerced.property_code,
            data_id: String::new(),
            value: coerced.value,
        }
    }

    pub fn row(&self) -> CsvRow<'_> {
        CsvRow {
            observed_at: self.observed_at.format(TIMESTAMP_FORMAT).to_string(),
            source_tag: &self.source_tag,
            property_code: self.property_code.as_str(),
            data_id: &self.data_id,
            value: self.value.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CsvRow<'a> {
    observed_at: String,
    source_tag: &'a str,
    property_code: &'a str,
    data_id: &'a str,
    value: String,
}
