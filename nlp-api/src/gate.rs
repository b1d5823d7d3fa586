//! Single-slot admission control for the annotation pipeline
//!
//! At most one pipeline run executes at a time. A request arriving while the
//! slot is held is refused immediately; there is no queue.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Returned when the slot is already held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Pseudonymisation in progress, endpoint is busy")]
pub struct Busy;

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slot: Arc<Semaphore>,
}

/// Holds the slot until dropped
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    /// Release the slot explicitly (dropping the permit does the same)
    pub fn release(self) {}
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the slot without waiting
    pub fn try_acquire(&self) -> Result<AdmissionPermit, Busy> {
        self.slot
            .clone()
            .try_acquire_owned()
            .map(|permit| AdmissionPermit { _permit: permit })
            .map_err(|_| Busy)
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let gate = AdmissionGate::new();
        let permit = gate.try_acquire().unwrap();

        assert!(gate.is_busy());
        assert_eq!(gate.try_acquire().unwrap_err(), Busy);

        permit.release();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_ok());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let gate = AdmissionGate::new();
        let other = gate.clone();
        let _permit = gate.try_acquire().unwrap();
        assert!(other.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_permit_released_when_worker_panics() {
        let gate = AdmissionGate::new();
        let permit = gate.try_acquire().unwrap();

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            panic!("pipeline failure");
        })
        .await;

        assert!(result.is_err());
        assert!(!gate.is_busy());
    }
}
