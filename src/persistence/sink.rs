//! sink.rs
//! Appends long-format records to one CSV file per calendar day.
//! - destination = output_dir / format(filename_format, date of observed_at) with `{unit}` substituted
//! - every append opens, writes one row, flushes, syncs and closes; no handle outlives the call
//! - a header row is written when a destination starts out empty

use chrono::{format::{Item, StrftimeItems}, DateTime, Local, NaiveDate};
use csv::WriterBuilder;
use log::{debug, info};
use std::{
    fmt::{self, Write as _},
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::SinkError;
use crate::persistence::record::{Record, HEADER};

pub const UNIT_PLACEHOLDER: &str = "{unit}";

/// Where records go.
pub trait RecordSink {
    fn append(&mut self, record: &Record) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;
}

/// Pure mapping from a timestamp to a destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationNaming {
    output_dir: PathBuf,
    unit_id: String,
    filename_format: String,
}

impl DestinationNaming {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        unit_id: impl Into<String>,
        filename_format: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let filename_format = filename_format.into();
        if filename_format.trim().is_empty()
            || StrftimeItems::new(&filename_format).any(|item| matches!(item, Item::Error))
        {
            return Err(SinkError::InvalidFilenameFormat(filename_format));
        }
        // Time-of-day and offset specifiers parse fine but cannot be rendered from a date.
        if render_date(&filename_format, NaiveDate::MIN).is_err() {
            return Err(SinkError::InvalidFilenameFormat(filename_format));
        }
        Ok(Self {
            output_dir: output_dir.into(),
            unit_id: unit_id.into(),
            filename_format,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_name_for(&self, date: NaiveDate) -> String {
        // Renderability was checked in `new`; rendering depends on the format, not the date.
        render_date(&self.filename_format, date)
            .unwrap_or_else(|_| self.filename_format.clone())
            .replace(UNIT_PLACEHOLDER, &self.unit_id)
    }

    /// Same calendar day of `observed_at` always yields the same path.
    pub fn destination_for(&self, observed_at: &DateTime<Local>) -> PathBuf {
        self.output_dir.join(self.file_name_for(observed_at.date_naive()))
    }
}

fn render_date(format: &str, date: NaiveDate) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write!(out, "{}", date.format(format))?;
    Ok(out)
}

/// Daily-rotated CSV sink.
pub struct CsvRecordSink {
    naming: DestinationNaming,
    current: Option<PathBuf>,
    appended: u64,
}

impl CsvRecordSink {
    /// Creates the output directory and probes today's destination. Failure here is fatal.
    pub fn open(naming: DestinationNaming) -> Result<Self, SinkError> {
        fs::create_dir_all(naming.output_dir())
            .map_err(|e| SinkError::io(naming.output_dir(), e))?;

        let probe = naming.destination_for(&Local::now());
        open_destination(&probe)?;
        info!("[Sink] writing records under {:?}", naming.output_dir());

        Ok(Self {
            naming,
            current: None,
            appended: 0,
        })
    }

    pub fn naming(&self) -> &DestinationNaming {
        &self.naming
    }

    pub fn appended(&self) -> u64 {
        self.appended
    }
}

impl RecordSink for CsvRecordSink {
    fn append(&mut self, record: &Record) -> Result<(), SinkError> {
        let path = self.naming.destination_for(&record.observed_at);
        if self.current.as_ref() != Some(&path) {
            info!("[Sink] destination is now {:?}", path);
            self.current = Some(path.clone());
        }

        let file = open_destination(&path)?;
        let mut wtr = WriterBuilder::new().has_headers(false).from_writer(file);
        wtr.serialize(record.row())
            .map_err(|e| SinkError::csv(&path, e))?;
        wtr.flush().map_err(|e| SinkError::io(&path, e))?;
        let file = wtr
            .into_inner()
            .map_err(|e| SinkError::io(&path, e.into_error()))?;
        file.sync_data().map_err(|e| SinkError::io(&path, e))?;

        self.appended += 1;
        debug!(
            "[Sink] {} {}={} -> {:?}",
            record.source_tag, record.property_code, record.value, path
        );
        Ok(())
    }

    /// Appends are already durable when they return; this only syncs the directory entry.
    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(path) = &self.current {
            let file = OpenOptions::new()
                .append(true)
                .open(path)
                .map_err(|e| SinkError::io(path, e))?;
            file.sync_all().map_err(|e| SinkError::io(path, e))?;
        }
        debug!("[Sink] flushed after {} records", self.appended);
        Ok(())
    }
}

/// Opens `path` for append, writing the header first if the file is empty.
fn open_destination(path: &Path) -> Result<File, SinkError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SinkError::io(path, e))?;

    let len = file.metadata().map_err(|e| SinkError::io(path, e))?.len();
    if len == 0 {
        let mut wtr = WriterBuilder::new().from_writer(&mut file);
        wtr.write_record(HEADER).map_err(|e| SinkError::csv(path, e))?;
        wtr.flush().map_err(|e| SinkError::io(path, e))?;
        drop(wtr);
        file.flush().map_err(|e| SinkError::io(path, e))?;
    }
    Ok(file)
}
