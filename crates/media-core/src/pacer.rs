//! Send-side byte FIFOs for the pacing worker
//!
//! Each registered transport owns one byte FIFO. `send_audio` fans encoded
//! frames into the FIFOs of every send-capable transport; the pacing worker
//! extracts exactly one expected-size frame per transport per tick, so
//! frames leave at the packetization rate however fast the caller writes.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

use crate::error::{Error, Result};

/// A FIFO never grows beyond this many expected-size frames; the pacer
/// drains one frame per ptime, so hitting the cap means the caller is
/// writing far faster than real time.
const MAX_BUFFERED_FRAMES: usize = 1000;

/// Shared pacing parameters, swapped atomically under the timing lock when
/// the packetization time changes
#[derive(Debug, Clone, Copy)]
pub(crate) struct PacerTiming {
    /// Tick period of the pacing worker
    pub ptime: Duration,
    /// Bytes extracted per transport per tick
    pub expected_payload_size: usize,
}

/// The per-transport send FIFOs
pub(crate) struct SendBufferSet {
    buffers: RwLock<HashMap<String, Mutex<BytesMut>>>,
}

impl SendBufferSet {
    pub(crate) fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Create the FIFO for a newly registered transport
    pub(crate) async fn add_key(&self, key: &str, expected_payload_size: usize) {
        let mut buffers = self.buffers.write().await;
        buffers.insert(
            key.to_string(),
            // Amortized headroom of a few frames before the map reallocates
            Mutex::new(BytesMut::with_capacity(expected_payload_size * 4)),
        );
    }

    /// Drop the FIFO of a removed transport
    pub(crate) async fn remove_key(&self, key: &str) {
        self.buffers.write().await.remove(key);
    }

    /// Registered FIFO keys
    pub(crate) async fn keys(&self) -> Vec<String> {
        self.buffers.read().await.keys().cloned().collect()
    }

    /// Append a copy of `frame` to the FIFOs named in `keys`.
    ///
    /// Appends are non-blocking; a FIFO past its frame cap refuses the
    /// write and the last such refusal is reported after every other FIFO
    /// has been fed.
    pub(crate) async fn append(
        &self,
        keys: &[String],
        frame: &[u8],
        expected_payload_size: usize,
    ) -> Result<()> {
        let buffers = self.buffers.read().await;
        let mut last_err = None;
        for key in keys {
            if let Some(buffer) = buffers.get(key) {
                let mut buffer = buffer.lock().await;
                if buffer.len() + frame.len() > expected_payload_size * MAX_BUFFERED_FRAMES {
                    last_err = Some(Error::AudioBufferFull {
                        transport_key: key.clone(),
                        occupancy: buffer.len(),
                    });
                    continue;
                }
                buffer.extend_from_slice(frame);
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Extract exactly `size` bytes from one FIFO, or nothing if it holds
    /// fewer. The FIFO length shrinks by exactly `size` on success.
    pub(crate) async fn extract_frame(&self, key: &str, size: usize) -> Option<Bytes> {
        let buffers = self.buffers.read().await;
        let buffer = buffers.get(key)?;
        let mut buffer = buffer.lock().await;
        if buffer.len() < size {
            return None;
        }
        Some(buffer.split_to(size).freeze())
    }

    /// Drain whatever remains in every FIFO, keyed by transport. Used at
    /// teardown to push out possibly-undersized tails.
    pub(crate) async fn drain_remaining(&self) -> Vec<(String, Bytes)> {
        let buffers = self.buffers.read().await;
        let mut tails = Vec::new();
        for (key, buffer) in buffers.iter() {
            let mut buffer = buffer.lock().await;
            if !buffer.is_empty() {
                tails.push((key.clone(), buffer.split().freeze()));
            }
        }
        tails
    }

    /// Empty every FIFO without delivering anything
    pub(crate) async fn clear_all(&self) {
        let buffers = self.buffers.read().await;
        for buffer in buffers.values() {
            buffer.lock().await.clear();
        }
        trace!("cleared all send FIFOs");
    }

    /// Buffered byte count for one FIFO
    pub(crate) async fn occupancy(&self, key: &str) -> usize {
        let buffers = self.buffers.read().await;
        match buffers.get(key) {
            Some(buffer) => buffer.lock().await.len(),
            None => 0,
        }
    }
}
