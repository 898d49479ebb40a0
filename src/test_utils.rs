//! Test utilities: an in-memory transport and notification payload builders
//!
//! Used by unit tests, session tests and benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::Result;
use crate::protocol::CommandPacket;
use crate::transport::{Endpoint, Transport};
use crate::PowerbaseError;

/// One write observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub endpoint: Endpoint,
    pub payload: Vec<u8>,
    pub at: tokio::time::Instant,
}

/// Transport that records every write attempt.
///
/// Can be switched into a failing mode (writes return an error) or a hanging
/// mode (writes never complete) to exercise error and timeout paths.
#[derive(Debug, Default)]
pub struct MockTransport {
    writes: Mutex<Vec<WriteRecord>>,
    failing: AtomicBool,
    hanging: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// All write attempts so far.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Payloads written to one endpoint, in order.
    pub fn payloads_to(&self, endpoint: Endpoint) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.endpoint == endpoint)
            .map(|w| w.payload.clone())
            .collect()
    }

    /// Command packets written so far, decoded.
    pub fn command_packets(&self) -> Vec<CommandPacket> {
        self.payloads_to(Endpoint::Command)
            .iter()
            .filter_map(|p| CommandPacket::from_bytes(p).ok())
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn write(&self, endpoint: Endpoint, payload: &[u8]) -> Result<()> {
        self.writes.lock().push(WriteRecord {
            endpoint,
            payload: payload.to_vec(),
            at: tokio::time::Instant::now(),
        });

        if self.hanging.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PowerbaseError::transport_failed("mock transport failure"));
        }
        Ok(())
    }
}

/// Build a slot notification payload without exit ticks.
pub fn slot_payload(slot: u8, lane1_entry: u32, lane2_entry: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(10);
    payload.push(0x00);
    payload.push(slot);
    payload.extend_from_slice(&lane1_entry.to_le_bytes());
    payload.extend_from_slice(&lane2_entry.to_le_bytes());
    payload
}

/// Build a throttle notification payload from six raw controller bytes.
pub fn throttle_payload(controllers: [u8; 6]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(7);
    payload.push(0x00);
    payload.extend_from_slice(&controllers);
    payload
}

/// Build a track sensor notification payload.
pub fn track_payload(sensor_id: u8, tick: u32) -> Vec<u8> {
    let mut payload = vec![0x00, sensor_id];
    payload.extend_from_slice(&tick.to_le_bytes());
    payload
}
