//! End-to-end pipeline behaviour: channel → consumer → CSV files on disk.

use std::{
    fs,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use smartmeter_logger::{
    acquisition::{
        channel::{reading_channel, OverflowPolicy, ReadingPublisher},
        producer::{Acquisition, ProducerAdapter, ProducerConfig},
        reading::{PropertyCode, ReadingEvent},
        simulated::SimulatedMeter,
    },
    error::ProducerError,
    lifecycle::shutdown::{LifecycleState, ShutdownCoordinator},
    persistence::{
        coercion::{default_rules, CoercionTable},
        consumer::{ConsumerConfig, LoopExit, ReadingConsumer},
        sink::{CsvRecordSink, DestinationNaming},
    },
    utils::metrics::PipelineStats,
};
use tempfile::TempDir;

const CODES: [&str; 6] = ["D3", "D7", "E1", "E7", "E0", "E3"];

/// Acquisition stand-in for tests that publish directly.
#[derive(Default)]
struct IdleAcquisition {
    stopped: bool,
}

impl Acquisition for IdleAcquisition {
    fn stop(&mut self, _grace_period: Duration) -> Result<(), ProducerError> {
        self.stopped = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }
}

struct Harness {
    dir: TempDir,
    publisher: ReadingPublisher,
    consumer: ReadingConsumer<CsvRecordSink>,
    stats: Arc<PipelineStats>,
}

fn harness(capacity: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let naming = DestinationNaming::new(dir.path(), "meter-01", "{unit}_%Y%m%d.csv").unwrap();
    let sink = CsvRecordSink::open(naming).unwrap();
    let (publisher, rx) = reading_channel(capacity, OverflowPolicy::Block, Duration::from_millis(100)).unwrap();
    let stats = Arc::new(PipelineStats::default());
    let consumer = ReadingConsumer::new(
        rx,
        CODES.map(PropertyCode::new),
        CoercionTable::new(default_rules()),
        sink,
        ConsumerConfig {
            poll_timeout: Duration::from_millis(20),
            grace_period: Duration::from_secs(2),
            drain_budget: 1024,
        },
        stats.clone(),
    );
    Harness {
        dir,
        publisher,
        consumer,
        stats,
    }
}

/// Data rows across every destination in `dir`, oldest file first.
fn read_rows(dir: &Path) -> Vec<Vec<String>> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "csv"))
        .collect();
    files.sort();

    let mut rows = Vec::new();
    for file in files {
        let mut reader = csv::Reader::from_path(&file).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(
            header.iter().collect::<Vec<_>>(),
            ["observed_at", "source_tag", "property_code", "data_id", "value"]
        );
        for record in reader.records() {
            rows.push(record.unwrap().iter().map(str::to_string).collect());
        }
    }
    rows
}

#[test]
fn test_fifo_preserved_to_disk() {
    let mut h = harness(256);
    for i in 0..100 {
        h.publisher
            .publish(ReadingEvent::ok("meter-01", "E7", i.to_string()))
            .unwrap();
    }
    drop(h.publisher);

    let coordinator = ShutdownCoordinator::default();
    let exit = h.consumer.run(&mut IdleAcquisition::default(), &coordinator);
    assert_eq!(exit, LoopExit::ChannelClosed);

    let values: Vec<i64> = read_rows(h.dir.path())
        .iter()
        .map(|r| r[4].parse().unwrap())
        .collect();
    assert_eq!(values, (0..100).collect::<Vec<_>>());
    assert_eq!(h.stats.snapshot().persisted, 100);
}

#[test]
fn test_unconfigured_code_produces_no_record() {
    let mut h = harness(8);
    h.publisher.publish(ReadingEvent::ok("meter-01", "ZZ", "42")).unwrap();
    drop(h.publisher);

    let coordinator = ShutdownCoordinator::default();
    h.consumer.run(&mut IdleAcquisition::default(), &coordinator);

    assert!(read_rows(h.dir.path()).is_empty());
    let snap = h.stats.snapshot();
    assert_eq!(snap.unknown_code, 1);
    assert_eq!(snap.persisted, 0);
}

#[test]
fn test_typed_values_in_publish_order() {
    let mut h = harness(8);
    h.publisher.publish(ReadingEvent::ok("meter-01", "E7", "1234")).unwrap();
    h.publisher.publish(ReadingEvent::ok("meter-01", "E0", "5678.9")).unwrap();
    drop(h.publisher);

    let coordinator = ShutdownCoordinator::default();
    h.consumer.run(&mut IdleAcquisition::default(), &coordinator);

    let rows = read_rows(h.dir.path());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1..], ["meter-01", "E7", "", "1234"]);
    assert_eq!(rows[1][1..], ["meter-01", "E0", "", "5678.9"]);
    assert!(rows[0][0] <= rows[1][0]);
}

#[test]
fn test_coercion_failure_skips_one_event() {
    let mut h = harness(8);
    h.publisher.publish(ReadingEvent::ok("meter-01", "E7", "n/a")).unwrap();
    h.publisher.publish(ReadingEvent::failed("meter-01", "E0", "timeout")).unwrap();
    h.publisher.publish(ReadingEvent::ok("meter-01", "E7", "99")).unwrap();
    drop(h.publisher);

    let coordinator = ShutdownCoordinator::default();
    h.consumer.run(&mut IdleAcquisition::default(), &coordinator);

    let rows = read_rows(h.dir.path());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][4], "99");
    let snap = h.stats.snapshot();
    assert_eq!(snap.coercion_errors, 1);
    assert_eq!(snap.failed_status, 1);
}

#[test]
fn test_stop_drains_queued_events() {
    let mut h = harness(8);
    for v in ["1", "2", "3"] {
        h.publisher.publish(ReadingEvent::ok("meter-01", "E7", v)).unwrap();
    }

    let coordinator = ShutdownCoordinator::default();
    assert!(coordinator.request_stop());

    let mut acquisition = IdleAcquisition::default();
    let exit = h.consumer.run(&mut acquisition, &coordinator);

    assert_eq!(exit, LoopExit::StopRequested);
    assert!(acquisition.stopped);
    assert_eq!(coordinator.state(), LifecycleState::Stopped);

    let values: Vec<String> = read_rows(h.dir.path()).into_iter().map(|r| r[4].clone()).collect();
    assert_eq!(values, ["1", "2", "3"]);
    assert_eq!(h.stats.snapshot().drained, 3);
}

#[test]
fn test_simulated_meter_end_to_end() {
    let mut h = harness(64);
    let codes: Vec<PropertyCode> = CODES.iter().map(PropertyCode::new).collect();
    let mut producer = ProducerAdapter::new(
        SimulatedMeter::new(0.0),
        h.publisher.clone(),
        ProducerConfig {
            source_tag: "meter-01".into(),
            properties: codes,
            interval: Duration::from_millis(50),
        },
    );
    drop(h.publisher);
    producer.start().unwrap();

    let coordinator = Arc::new(ShutdownCoordinator::default());
    let stopper = {
        let coordinator = coordinator.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            coordinator.request_stop();
        })
    };

    let started = Instant::now();
    let exit = h.consumer.run(&mut producer, &coordinator);
    stopper.join().unwrap();

    assert_eq!(exit, LoopExit::StopRequested);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!producer.is_running());
    assert_eq!(coordinator.state(), LifecycleState::Stopped);

    let rows = read_rows(h.dir.path());
    assert!(rows.len() >= CODES.len());
    // Every cycle pushes the configured codes in order.
    let first_cycle: Vec<&str> = rows[..CODES.len()].iter().map(|r| r[2].as_str()).collect();
    assert_eq!(first_cycle, CODES);
    assert!(rows.iter().all(|r| r[1] == "meter-01" && r[3].is_empty()));
    assert_eq!(h.stats.snapshot().dropped(), 0);
}
