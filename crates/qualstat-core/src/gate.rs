use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Bounds how many heavyweight exports may run at once.
///
/// Acquisition never queues: a full gate answers [`Error::ExportBusy`] right
/// away so the caller can ask the client to retry later.
#[derive(Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn acquire(&self, cancel: &CancellationToken) -> Result<ExportPermit> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => {
                tracing::debug!(
                    "Export slot acquired ({}/{} in use)",
                    self.in_use(),
                    self.capacity
                );
                Ok(ExportPermit {
                    permit: Some(permit),
                })
            }
            Err(TryAcquireError::NoPermits) => Err(Error::ExportBusy),
            Err(TryAcquireError::Closed) => {
                Err(Error::StoreUnavailable("export gate closed".to_string()))
            }
        }
    }
}

/// One held export slot. The slot goes back to the gate exactly once, either
/// through [`ExportPermit::release`] or when the permit is dropped.
#[must_use = "dropping the permit releases the export slot"]
pub struct ExportPermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl ExportPermit {
    pub fn release(mut self) {
        self.permit.take();
    }
}

impl Drop for ExportPermit {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            tracing::trace!("Export slot released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_when_full() {
        let gate = AdmissionGate::new(1);
        let cancel = CancellationToken::new();

        let permit = gate.acquire(&cancel).unwrap();
        assert_eq!(gate.in_use(), 1);
        assert!(matches!(gate.acquire(&cancel), Err(Error::ExportBusy)));

        permit.release();
        assert_eq!(gate.in_use(), 0);
        assert!(gate.acquire(&cancel).is_ok());
    }

    #[test]
    fn test_cancelled_caller_gets_no_slot() {
        let gate = AdmissionGate::new(2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(gate.acquire(&cancel), Err(Error::Cancelled)));
        assert_eq!(gate.in_use(), 0);
    }

    #[test]
    fn test_drop_releases_once() {
        let gate = AdmissionGate::new(2);
        let cancel = CancellationToken::new();
        {
            let _a = gate.acquire(&cancel).unwrap();
            let _b = gate.acquire(&cancel).unwrap();
            assert_eq!(gate.in_use(), 2);
        }
        assert_eq!(gate.in_use(), 0);
        assert_eq!(gate.slots.available_permits(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(AdmissionGate::new(0).capacity(), 1);
    }
}
