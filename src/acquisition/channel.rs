//! channel.rs
//! Bounded FIFO hand-off between the acquisition thread and the consumer loop.
//! - single producer, single consumer, enqueue order preserved
//! - overflow handled by an explicit policy: block (bounded wait), drop oldest, reject
//! - `consume` never blocks longer than `MAX_CONSUME_TIMEOUT` so the loop can re-check shutdown

use crossbeam::channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use log::{debug, warn};
use serde::Deserialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::acquisition::reading::ReadingEvent;
use crate::error::ChannelError;

/// Upper bound for a single `consume` wait.
pub const MAX_CONSUME_TIMEOUT: Duration = Duration::from_secs(1);

// Drop-oldest retries before giving up when the consumer races us for the head slot.
const DISPLACE_ATTEMPTS: usize = 3;

/// What `publish` does when the channel is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for space, up to the configured block timeout, then report `Full`.
    #[default]
    Block,
    /// Discard the oldest queued reading to make room.
    DropOldest,
    /// Fail immediately with `Full`.
    Reject,
}

/// Publish-side counters.
#[derive(Debug, Default)]
pub struct ChannelStats {
    published: AtomicU64,
    displaced: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub published: u64,
    pub displaced: u64,
    pub rejected: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Creates a bounded reading channel.
pub fn reading_channel(
    capacity: usize,
    policy: OverflowPolicy,
    block_timeout: Duration,
) -> Result<(ReadingPublisher, ReadingReceiver), ChannelError> {
    if capacity == 0 {
        return Err(ChannelError::ZeroCapacity);
    }

    let (tx, rx) = bounded::<ReadingEvent>(capacity);
    let stats = Arc::new(ChannelStats::default());

    let publisher = ReadingPublisher {
        tx,
        // Only drop-oldest needs to pop from the head on the producer side.
        head: (policy == OverflowPolicy::DropOldest).then(|| rx.clone()),
        policy,
        block_timeout,
        stats: stats.clone(),
    };
    let receiver = ReadingReceiver { rx, stats };

    Ok((publisher, receiver))
}

/// Producer handle.
#[derive(Clone)]
pub struct ReadingPublisher {
    tx: Sender<ReadingEvent>,
    head: Option<Receiver<ReadingEvent>>,
    policy: OverflowPolicy,
    block_timeout: Duration,
    stats: Arc<ChannelStats>,
}

impl ReadingPublisher {
    /// Enqueue one reading according to the overflow policy.
    pub fn publish(&self, event: ReadingEvent) -> Result<(), ChannelError> {
        let result = match self.policy {
            OverflowPolicy::Block => self.publish_blocking(event),
            OverflowPolicy::Reject => self.publish_or_reject(event),
            OverflowPolicy::DropOldest => self.publish_displacing(event),
        };

        match &result {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(ChannelError::Full { .. }) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        result
    }

    fn publish_blocking(&self, event: ReadingEvent) -> Result<(), ChannelError> {
        match self.tx.send_timeout(event, self.block_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(ev)) => Err(ChannelError::Full {
                property_code: ev.property_code,
            }),
            Err(SendTimeoutError::Disconnected(_)) => Err(ChannelError::Disconnected),
        }
    }

    fn publish_or_reject(&self, event: ReadingEvent) -> Result<(), ChannelError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(ev)) => Err(ChannelError::Full {
                property_code: ev.property_code,
            }),
            Err(TrySendError::Disconnected(_)) => Err(ChannelError::Disconnected),
        }
    }

    fn publish_displacing(&self, mut event: ReadingEvent) -> Result<(), ChannelError> {
        for _ in 0..DISPLACE_ATTEMPTS {
            match self.tx.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(ChannelError::Disconnected),
                Err(TrySendError::Full(ev)) => {
                    event = ev;
                    if let Some(head) = &self.head {
                        if let Ok(oldest) = head.try_recv() {
                            self.stats.displaced.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                "[Channel] full, dropped oldest reading {}={} from {}",
                                oldest.property_code, oldest.raw_value, oldest.source_tag
                            );
                        }
                    }
                }
            }
        }
        Err(ChannelError::Full {
            property_code: event.property_code,
        })
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        self.stats.clone()
    }
}

/// Consumer handle. Deliberately not `Clone`: exactly one consumer.
pub struct ReadingReceiver {
    rx: Receiver<ReadingEvent>,
    stats: Arc<ChannelStats>,
}

impl ReadingReceiver {
    /// Next reading in enqueue order, or `Empty` once `timeout` (clamped to 1 s) elapses.
    pub fn consume(&self, timeout: Duration) -> Result<ReadingEvent, ChannelError> {
        let timeout = timeout.min(MAX_CONSUME_TIMEOUT);
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(ChannelError::Empty),
            Err(RecvTimeoutError::Disconnected) => {
                debug!("[Channel] all publishers dropped");
                Err(ChannelError::Disconnected)
            }
        }
    }

    /// Non-blocking variant used by the shutdown drain.
    pub fn try_consume(&self) -> Result<ReadingEvent, ChannelError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) => Err(ChannelError::Empty),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        // Always bounded; constructed through `reading_channel`.
        self.rx.capacity().unwrap_or(0)
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}
