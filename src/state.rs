//! Shared monitor state.
//!
//! The reader loop mutates these records while the HTTP tasks read and
//! override them, so every record sits behind its own mutex. A record is
//! always locked as a whole; readers never see one half-updated.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::correlator::{BurnerTimingState, FaultState};
use crate::decoder::ProcessValueRecord;

/// Records owned by the decoder and correlator.
#[derive(Debug, Default)]
pub struct SharedState {
    process_values: Mutex<ProcessValueRecord>,
    fault: Mutex<FaultState>,
    burner: Mutex<BurnerTimingState>,
    message: Mutex<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_values(&self) -> MutexGuard<'_, ProcessValueRecord> {
        lock(&self.process_values)
    }

    pub fn burner(&self) -> MutexGuard<'_, BurnerTimingState> {
        lock(&self.burner)
    }

    pub fn burner_snapshot(&self) -> BurnerTimingState {
        self.burner().clone()
    }

    pub fn fault_snapshot(&self) -> FaultState {
        lock(&self.fault).clone()
    }

    /// Replace the fault record wholesale.
    pub fn set_fault(&self, fault: FaultState) {
        *lock(&self.fault) = fault;
    }

    pub fn message(&self) -> String {
        lock(&self.message).clone()
    }

    pub fn set_message(&self, message: String) {
        *lock(&self.message) = message;
    }
}
