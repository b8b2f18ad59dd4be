//! producer.rs
//! Wraps an opaque meter driver and publishes its readings onto the reading channel.
//! - the acquisition thread owns the driver (and with it the serial port) for its lifetime
//! - cycles are paced by the acquisition interval; a stop request wakes the wait immediately
//! - `stop(grace)` waits at most `grace` for the thread to finish the current cycle

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::acquisition::{
    channel::ReadingPublisher,
    reading::{PropertyCode, RawValue, ReadingEvent, ReadingStatus},
};
use crate::error::{DriverError, ProducerError};

/// One `(property_code, raw_value, status)` tuple pushed by a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverReading {
    pub property_code: PropertyCode,
    pub raw_value: RawValue,
    pub status: ReadingStatus,
}

impl DriverReading {
    pub fn ok(property_code: impl Into<PropertyCode>, raw_value: impl Into<RawValue>) -> Self {
        Self {
            property_code: property_code.into(),
            raw_value: raw_value.into(),
            status: ReadingStatus::Ok,
        }
    }

    pub fn failed(property_code: impl Into<PropertyCode>, reason: impl Into<String>) -> Self {
        Self {
            property_code: property_code.into(),
            raw_value: RawValue::Text(String::new()),
            status: ReadingStatus::Failed(reason.into()),
        }
    }
}

/// The hardware driver seam. Protocol and connection state stay inside the driver.
pub trait MeterDriver: Send + 'static {
    /// Establish the link. Runs on the acquisition thread before the first cycle.
    fn connect(&mut self) -> Result<(), DriverError>;

    /// One acquisition cycle: push zero or more readings for `properties`.
    fn acquire(&mut self, properties: &[PropertyCode], push: &mut dyn FnMut(DriverReading));

    /// Release the link. Runs on the acquisition thread after the last cycle.
    fn disconnect(&mut self) {}
}

/// Lifecycle control the consumer loop needs from the producer side.
pub trait Acquisition {
    fn stop(&mut self, grace_period: Duration) -> Result<(), ProducerError>;

    /// True once the background activity has ended on its own (e.g. connect failure).
    fn is_finished(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub source_tag: String,
    pub properties: Vec<PropertyCode>,
    pub interval: Duration,
}

struct Worker<D> {
    handle: JoinHandle<D>,
    stop_tx: Sender<()>,
    // Never sent on; disconnects when the thread drops its end.
    done_rx: Receiver<()>,
}

pub struct ProducerAdapter<D: MeterDriver> {
    config: ProducerConfig,
    publisher: ReadingPublisher,
    driver: Option<D>,
    worker: Option<Worker<D>>,
}

impl<D: MeterDriver> ProducerAdapter<D> {
    pub fn new(driver: D, publisher: ReadingPublisher, config: ProducerConfig) -> Self {
        Self {
            config,
            publisher,
            driver: Some(driver),
            worker: None,
        }
    }

    /// Begin background acquisition.
    pub fn start(&mut self) -> Result<(), ProducerError> {
        if self.worker.is_some() {
            return Err(ProducerError::AlreadyRunning);
        }
        let driver = self.driver.take().ok_or(ProducerError::DriverUnavailable)?;

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(0);
        let publisher = self.publisher.clone();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("meter-acquisition".into())
            .spawn(move || {
                let _done = done_tx;
                let mut driver = driver;
                acquisition_loop(&mut driver, &publisher, &config, &stop_rx);
                driver
            })
            .map_err(ProducerError::Spawn)?;

        info!(
            "[Producer] started: source={} properties={:?} interval={:?}",
            self.config.source_tag, self.config.properties, self.config.interval
        );
        self.worker = Some(Worker {
            handle,
            stop_tx,
            done_rx,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl<D: MeterDriver> Acquisition for ProducerAdapter<D> {
    /// Signal the acquisition thread and wait up to `grace_period` for it to exit.
    /// Stopping an adapter that is not running is a no-op.
    fn stop(&mut self, grace_period: Duration) -> Result<(), ProducerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let _ = worker.stop_tx.try_send(());

        match worker.done_rx.recv_timeout(grace_period) {
            Err(RecvTimeoutError::Timeout) => {
                // Detach: the thread keeps the driver until its current cycle returns.
                warn!(
                    "[Producer] acquisition did not stop within {:?}; abandoning thread",
                    grace_period
                );
                Err(ProducerError::StopTimeout(grace_period))
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match worker.handle.join() {
                Ok(driver) => {
                    self.driver = Some(driver);
                    info!("[Producer] stopped");
                    Ok(())
                }
                Err(_) => {
                    error!("[Producer] acquisition thread panicked");
                    Err(ProducerError::Panicked)
                }
            },
        }
    }

    fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.handle.is_finished())
    }
}

impl<D: MeterDriver> Drop for ProducerAdapter<D> {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            let _ = worker.stop_tx.try_send(());
        }
    }
}

/// Body of the acquisition thread.
fn acquisition_loop<D: MeterDriver>(
    driver: &mut D,
    publisher: &ReadingPublisher,
    config: &ProducerConfig,
    stop_rx: &Receiver<()>,
) {
    if let Err(e) = driver.connect() {
        error!("[Producer] {}", e);
        return;
    }
    info!("[Producer] meter connected");

    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        let mut published = 0usize;
        let mut rejected = 0usize;

        driver.acquire(&config.properties, &mut |reading| {
            let event = ReadingEvent {
                source_tag: config.source_tag.clone(),
                property_code: reading.property_code,
                raw_value: reading.raw_value,
                status: reading.status,
            };
            match publisher.publish(event) {
                Ok(()) => published += 1,
                Err(e) => {
                    rejected += 1;
                    warn!("[Producer] publish failed: {}", e);
                }
            }
        });
        debug!(
            "[Producer] cycle {} published={} rejected={}",
            cycle, published, rejected
        );

        match stop_rx.recv_timeout(config.interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    driver.disconnect();
    debug!("[Producer] acquisition loop exited after {} cycles", cycle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::channel::{reading_channel, OverflowPolicy, ReadingReceiver};
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        time::Instant,
    };

    struct ScriptedDriver {
        fail_connect: bool,
        cycle_delay: Duration,
        cycles: Arc<AtomicUsize>,
        disconnected: Arc<AtomicBool>,
    }

    impl ScriptedDriver {
        fn new() -> Self {
            Self {
                fail_connect: false,
                cycle_delay: Duration::ZERO,
                cycles: Arc::new(AtomicUsize::new(0)),
                disconnected: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl MeterDriver for ScriptedDriver {
        fn connect(&mut self) -> Result<(), DriverError> {
            if self.fail_connect {
                return Err(DriverError::Connect("no PAN found".into()));
            }
            Ok(())
        }

        fn acquire(&mut self, properties: &[PropertyCode], push: &mut dyn FnMut(DriverReading)) {
            thread::sleep(self.cycle_delay);
            let n = self.cycles.fetch_add(1, Ordering::SeqCst);
            for code in properties {
                push(DriverReading::ok(code.clone(), (n as i64) * 10));
            }
        }

        fn disconnect(&mut self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn adapter(driver: ScriptedDriver, interval: Duration) -> (ProducerAdapter<ScriptedDriver>, ReadingReceiver) {
        let (tx, rx) = reading_channel(64, OverflowPolicy::Block, Duration::from_millis(50)).unwrap();
        let config = ProducerConfig {
            source_tag: "meter-01".into(),
            properties: vec!["E7".into(), "E0".into()],
            interval,
        };
        (ProducerAdapter::new(driver, tx, config), rx)
    }

    #[test]
    fn test_publishes_cycle_readings_in_order() {
        let (mut producer, rx) = adapter(ScriptedDriver::new(), Duration::from_secs(60));
        producer.start().unwrap();

        let first = rx.consume(Duration::from_secs(1)).unwrap();
        let second = rx.consume(Duration::from_secs(1)).unwrap();
        assert_eq!(first.property_code.as_str(), "E7");
        assert_eq!(second.property_code.as_str(), "E0");
        assert_eq!(first.source_tag, "meter-01");

        producer.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut producer, _rx) = adapter(ScriptedDriver::new(), Duration::from_secs(60));
        producer.start().unwrap();
        assert!(matches!(producer.start(), Err(ProducerError::AlreadyRunning)));
        producer.stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_stop_interrupts_interval_wait() {
        let driver = ScriptedDriver::new();
        let disconnected = driver.disconnected.clone();
        let (mut producer, _rx) = adapter(driver, Duration::from_secs(3600));
        producer.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        producer.stop(Duration::from_secs(2)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(disconnected.load(Ordering::SeqCst));
        assert!(!producer.is_running());
    }

    #[test]
    fn test_restart_after_clean_stop() {
        let driver = ScriptedDriver::new();
        let cycles = driver.cycles.clone();
        let (mut producer, _rx) = adapter(driver, Duration::from_secs(3600));
        producer.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        producer.stop(Duration::from_secs(2)).unwrap();
        producer.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        producer.stop(Duration::from_secs(2)).unwrap();
        assert_eq!(cycles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_timeout_abandons_driver() {
        let mut driver = ScriptedDriver::new();
        driver.cycle_delay = Duration::from_millis(500);
        let (mut producer, _rx) = adapter(driver, Duration::from_secs(3600));
        producer.start().unwrap();

        let start = Instant::now();
        let err = producer.stop(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ProducerError::StopTimeout(_)));
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(matches!(producer.start(), Err(ProducerError::DriverUnavailable)));
    }

    #[test]
    fn test_connect_failure_finishes_thread() {
        let mut driver = ScriptedDriver::new();
        driver.fail_connect = true;
        let (mut producer, rx) = adapter(driver, Duration::from_secs(60));
        producer.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !producer.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(producer.is_finished());
        assert!(rx.is_empty());
        assert!(producer.stop(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (mut producer, _rx) = adapter(ScriptedDriver::new(), Duration::from_secs(60));
        assert!(producer.stop(Duration::from_millis(10)).is_ok());
        assert!(!producer.is_finished());
    }
}
