//! CaptureLeaseManager - one open handle per capture source
//!
//! A worker that is being replaced may still be unwinding while the
//! reconciler starts its successor for the same source. The successor waits
//! briefly for the lease and otherwise counts the open as failed, so the
//! old worker's own release stays the only thing that ends the resource's
//! lifetime.
//!
//! A source only has a slot while someone holds or waits for its lease.

use crate::camera_registry::redact_credentials;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// Default wait for a busy source (2s)
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 2000;

type Slots = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Serializes access per capture source
pub struct CaptureLeaseManager {
    /// lease key -> slot, only while in use
    slots: Slots,
    wait_timeout: Duration,
}

impl CaptureLeaseManager {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS))
    }

    pub fn with_timeout(wait_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(StdMutex::new(HashMap::new())),
            wait_timeout,
        }
    }

    /// Wait up to the configured timeout for the source's lease.
    ///
    /// Dropping the returned lease frees the source.
    pub async fn acquire(&self, key: &str) -> Result<CaptureLease> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        match timeout(self.wait_timeout, slot.lock_owned()).await {
            Ok(guard) => {
                tracing::debug!(source = %redact_credentials(key), "Capture lease acquired");
                Ok(CaptureLease {
                    slots: self.slots.clone(),
                    key: key.to_string(),
                    guard: Some(guard),
                })
            }
            Err(_) => {
                evict_if_idle(&self.slots, key);
                let source = redact_credentials(key);
                tracing::warn!(
                    source = %source,
                    timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Capture source still held by another worker"
                );
                Err(Error::CaptureBusy(source))
            }
        }
    }
}

impl Default for CaptureLeaseManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the slot when only the map still references it
fn evict_if_idle(slots: &Slots, key: &str) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
        slots.remove(key);
    }
}

/// Exclusive right to hold a source open
pub struct CaptureLease {
    slots: Slots,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        // the guard owns a slot reference; let it go before counting
        self.guard.take();
        evict_if_idle(&self.slots, &self.key);
        tracing::debug!(source = %redact_credentials(&self.key), "Capture lease released");
    }
}
