//! Log output of the consumer's drop paths. Installs a process-wide capturing logger, so it
//! lives in its own test binary and holds a single test.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{Level, LevelFilter, Log, Metadata, Record};
use smartmeter_logger::{
    acquisition::{
        channel::{reading_channel, OverflowPolicy},
        producer::Acquisition,
        reading::{PropertyCode, ReadingEvent},
    },
    error::ProducerError,
    lifecycle::shutdown::ShutdownCoordinator,
    persistence::{
        coercion::{default_rules, CoercionTable},
        consumer::{ConsumerConfig, ReadingConsumer},
        sink::{CsvRecordSink, DestinationNaming},
    },
    utils::metrics::PipelineStats,
};

static CAPTURED: Mutex<Vec<(Level, String)>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

struct IdleAcquisition;

impl Acquisition for IdleAcquisition {
    fn stop(&mut self, _grace_period: Duration) -> Result<(), ProducerError> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }
}

#[test]
fn test_unconfigured_code_logged_exactly_once() {
    log::set_boxed_logger(Box::new(CaptureLogger)).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let dir = tempfile::tempdir().unwrap();
    let naming = DestinationNaming::new(dir.path(), "meter-01", "{unit}_%Y%m%d.csv").unwrap();
    let (tx, rx) = reading_channel(8, OverflowPolicy::Block, Duration::from_millis(100)).unwrap();
    let stats = Arc::new(PipelineStats::default());
    let mut consumer = ReadingConsumer::new(
        rx,
        ["E7", "E0"].map(PropertyCode::new),
        CoercionTable::new(default_rules()),
        CsvRecordSink::open(naming).unwrap(),
        ConsumerConfig {
            poll_timeout: Duration::from_millis(20),
            grace_period: Duration::from_secs(1),
            drain_budget: 16,
        },
        stats.clone(),
    );

    tx.publish(ReadingEvent::ok("meter-01", "ZZ", "4242")).unwrap();
    tx.publish(ReadingEvent::ok("meter-01", "E7", "100")).unwrap();
    drop(tx);
    consumer.run(&mut IdleAcquisition, &ShutdownCoordinator::default());

    let captured = CAPTURED.lock().unwrap().clone();
    let mentions: Vec<&(Level, String)> = captured
        .iter()
        .filter(|(_, msg)| msg.contains("code ZZ"))
        .collect();
    assert_eq!(mentions.len(), 1, "{captured:?}");
    let (level, msg) = mentions[0];
    assert_eq!(*level, Level::Warn);
    assert!(msg.contains("4242"), "{msg}");

    assert_eq!(stats.snapshot().unknown_code, 1);
    assert_eq!(stats.snapshot().persisted, 1);
}
