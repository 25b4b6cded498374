//! In-process fan-out channel between sources and sinks.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: every attached [`BusReader`]
//! observes every write in one total order, at its own pace. Readers block
//! with `blocking_recv`, so tasks run on plain OS threads and no async
//! runtime is needed.
//!
//! The ring is bounded. Writers never block; a reader that falls more than
//! `capacity` messages behind loses the oldest ones it has not read yet, and
//! the loss is logged and counted on that reader only.

use bytes::Bytes;
use log::{info, warn};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::meter::Reading;
use crate::utils::error::GatewayError;

pub const DEFAULT_CAPACITY: usize = 64;

/// Opaque payload carried by the Bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    payload: Bytes,
}

impl BusMessage {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Reading> for BusMessage {
    fn from(reading: Reading) -> Self {
        Self::new(reading.to_bytes())
    }
}

#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<BusMessage>,
    capacity: usize,
}

impl Bus {
    /// Largest capacity the ring accepts.
    pub const MAX_CAPACITY: usize = usize::MAX >> 1;

    /// Creates a Bus holding at least `capacity` messages per reader.
    ///
    /// The ring size is `capacity` rounded up to a power of two; `capacity()`
    /// reports the effective size.
    pub fn new(capacity: usize) -> Result<Self, GatewayError> {
        if capacity == 0 {
            return Err(GatewayError::Config("Bus capacity must be at least 1".to_string()));
        }
        if capacity > Self::MAX_CAPACITY {
            return Err(GatewayError::Config(format!(
                "Bus capacity {} exceeds the maximum of {}",
                capacity,
                Self::MAX_CAPACITY
            )));
        }

        let effective = capacity.next_power_of_two();
        if effective != capacity {
            info!("🚌 Bus capacity {} rounded up to {}", capacity, effective);
        }
        let (tx, _rx) = broadcast::channel(effective);
        Ok(Self {
            tx,
            capacity: effective,
        })
    }

    /// New reader positioned after the latest write. Nothing earlier is replayed.
    pub fn attach(&self) -> BusReader {
        BusReader {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn writer(&self) -> BusWriter {
        BusWriter { tx: self.tx.clone() }
    }

    /// Returns how many readers the message was queued for.
    pub fn write(&self, message: BusMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    pub fn reader_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Write handle. Writes from every handle of one Bus share a single order.
#[derive(Clone)]
pub struct BusWriter {
    tx: broadcast::Sender<BusMessage>,
}

impl BusWriter {
    pub fn write(&self, message: BusMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }
}

pub struct BusReader {
    rx: broadcast::Receiver<BusMessage>,
    dropped: u64,
}

impl BusReader {
    /// Blocks until the next message. `None` once the Bus and every writer
    /// are gone and nothing is left to drain.
    ///
    /// Must not be called from inside an async runtime.
    pub fn read(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.blocking_recv() {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_read(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Messages this reader lost to ring overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        warn!(
            "⚠️  Bus reader fell behind, {} message(s) dropped ({} total)",
            skipped, self.dropped
        );
    }
}
