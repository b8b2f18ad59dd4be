//! consumer.rs
//! The single control loop: channel → acquisition-set check → coercion → record sink.
//!
//! - waits on the channel with a bounded timeout and re-checks the shutdown state between waits
//! - every per-event failure (failed status, unknown code, coercion, sink I/O) is logged and
//!   contained; the loop moves on to the next event
//! - shutdown: STOPPING → producer stop (grace) → bounded drain → sink flush → STOPPED

use chrono::Local;
use log::{debug, error, info, warn};
use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::acquisition::{
    channel::ReadingReceiver,
    producer::Acquisition,
    reading::{PropertyCode, ReadingEvent, ReadingStatus},
};
use crate::error::ChannelError;
use crate::lifecycle::shutdown::ShutdownCoordinator;
use crate::persistence::{coercion::CoercionTable, record::Record, sink::RecordSink};
use crate::utils::metrics::{log_summary, PipelineStats};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Per-wait channel timeout (≤ 1 s).
    pub poll_timeout: Duration,
    /// Budget for producer stop + drain.
    pub grace_period: Duration,
    /// Maximum events pulled from the channel after the producer stopped.
    pub drain_budget: usize,
}

/// Why the loop left its steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    StopRequested,
    /// Acquisition thread ended on its own (e.g. the meter never connected).
    ProducerFinished,
    /// Every publisher was dropped.
    ChannelClosed,
}

/// Per-event result; used for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Persisted,
    FailedStatus,
    UnknownPropertyCode,
    CoercionFailed,
    SinkFailed,
}

pub struct ReadingConsumer<S: RecordSink> {
    rx: ReadingReceiver,
    acquisition_set: HashSet<PropertyCode>,
    coercion: CoercionTable,
    sink: S,
    config: ConsumerConfig,
    stats: Arc<PipelineStats>,
}

impl<S: RecordSink> ReadingConsumer<S> {
    pub fn new(
        rx: ReadingReceiver,
        acquisition_set: impl IntoIterator<Item = PropertyCode>,
        coercion: CoercionTable,
        sink: S,
        config: ConsumerConfig,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            rx,
            acquisition_set: acquisition_set.into_iter().collect(),
            coercion,
            sink,
            config,
            stats,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run until a stop is requested (or the producer side goes away), then perform the
    /// shutdown sequence. Returns once the coordinator is `Stopped`.
    pub fn run<A: Acquisition>(
        &mut self,
        acquisition: &mut A,
        coordinator: &ShutdownCoordinator,
    ) -> LoopExit {
        info!(
            "[Consumer] started channel_capacity={} poll={:?} grace={:?} drain_budget={}",
            self.rx.capacity(),
            self.config.poll_timeout,
            self.config.grace_period,
            self.config.drain_budget
        );

        let exit = loop {
            if coordinator.is_stop_requested() {
                break LoopExit::StopRequested;
            }

            match self.rx.consume(self.config.poll_timeout) {
                Ok(event) => {
                    self.handle_event(event);
                }
                Err(ChannelError::Empty) => {
                    if acquisition.is_finished() && !coordinator.is_stop_requested() {
                        error!("[Consumer] acquisition ended unexpectedly");
                        break LoopExit::ProducerFinished;
                    }
                }
                Err(ChannelError::Disconnected) => {
                    warn!("[Consumer] reading channel closed");
                    break LoopExit::ChannelClosed;
                }
                Err(e) => {
                    warn!("[Consumer] unexpected channel error: {}", e);
                }
            }
        };

        info!("[Consumer] leaving steady state: {:?}", exit);
        self.shutdown(acquisition, coordinator);
        exit
    }

    fn shutdown<A: Acquisition>(&mut self, acquisition: &mut A, coordinator: &ShutdownCoordinator) {
        if let Err(e) = coordinator.begin_stopping() {
            warn!("[Consumer] {}", e);
        }
        let deadline = Instant::now() + self.config.grace_period;

        match acquisition.stop(self.config.grace_period) {
            Ok(()) => debug!("[Consumer] producer stopped"),
            Err(e) => warn!("[Consumer] {}; continuing shutdown", e),
        }

        let drained = self.drain(deadline);
        self.stats.record_drained(drained as u64);

        if let Err(e) = self.sink.flush() {
            error!("[Consumer] final flush failed: {}", e);
        }
        if let Err(e) = coordinator.mark_stopped() {
            warn!("[Consumer] {}", e);
        }

        log_summary(&self.stats.snapshot(), &self.rx.stats());
        info!("[Consumer] stopped");
    }

    /// Pull what is still queued, bounded by `drain_budget` and the grace deadline.
    fn drain(&mut self, deadline: Instant) -> usize {
        let mut drained = 0usize;
        while drained < self.config.drain_budget {
            if Instant::now() >= deadline {
                warn!(
                    "[Consumer] grace period exhausted; {} queued readings not persisted",
                    self.rx.len()
                );
                return drained;
            }
            match self.rx.try_consume() {
                Ok(event) => {
                    self.handle_event(event);
                    drained += 1;
                }
                Err(_) => return drained,
            }
        }
        if !self.rx.is_empty() {
            warn!(
                "[Consumer] drain budget of {} reached; {} queued readings not persisted",
                self.config.drain_budget,
                self.rx.len()
            );
        }
        drained
    }

    /// Process one dequeued reading. Never panics, never propagates.
    pub fn handle_event(&mut self, event: ReadingEvent) -> EventOutcome {
        let observed_at = Local::now();

        if let ReadingStatus::Failed(reason) = &event.status {
            warn!(
                "[Consumer] acquisition of {} from {} failed: {}",
                event.property_code, event.source_tag, reason
            );
            self.stats.record_failed_status();
            return EventOutcome::FailedStatus;
        }

        if !self.acquisition_set.contains(&event.property_code) {
            warn!(
                "[Consumer] dropping reading for unconfigured property code {} (raw value {:?}, source {})",
                event.property_code,
                event.raw_value.to_string(),
                event.source_tag
            );
            self.stats.record_unknown_code();
            return EventOutcome::UnknownPropertyCode;
        }

        let coerced = match self.coercion.coerce(&event.property_code, &event.raw_value) {
            Ok(coerced) => coerced,
            Err(e) => {
                warn!("[Consumer] dropping reading from {}: {}", event.source_tag, e);
                self.stats.record_coercion_error();
                return EventOutcome::CoercionFailed;
            }
        };

        let record = Record::new(observed_at, event.source_tag, coerced);
        match self.sink.append(&record) {
            Ok(()) => {
                debug!("[Consumer] persisted {}={}", record.property_code, record.value);
                self.stats.record_persisted();
                EventOutcome::Persisted
            }
            Err(e) => {
                error!(
                    "[Consumer] lost reading {}={} (raw {:?}): {}",
                    record.property_code,
                    record.value,
                    event.raw_value.to_string(),
                    e
                );
                self.stats.record_sink_error();
                EventOutcome::SinkFailed
            }
        }
    }
}
