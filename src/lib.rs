//! # smartmeter_logger
//!
//! Periodic smart-meter telemetry acquisition with durable, day-rotated CSV persistence.
//!
//! ```text
//! MeterDriver ─push─▶ ProducerAdapter ─publish─▶ ReadingChannel ─consume─▶ ReadingConsumer
//!                                                                            │ coercion
//!                                                                            ▼
//!                                                                      CsvRecordSink
//! ```
//!
//! - **acquisition**: data model, bounded reading channel, producer adapter, simulated meter.
//! - **persistence**: type coercion, long-format records, CSV sink, the consumer loop.
//! - **lifecycle**: shutdown state machine and the signal listener driving it.
//! - **utils**: YAML settings, toggleable logging, pipeline counters.

pub mod acquisition;
pub mod error;
pub mod lifecycle;
pub mod persistence;
pub mod utils;
