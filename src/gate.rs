//! Bounded concurrency for save and load operations.
//!
//! Saves and loads draw from independent slot pools. Acquisition blocks up
//! to a timeout; a zero timeout turns a full pool into an immediate `Busy`.
//! Guards release their slot exactly once, whether dropped or released
//! explicitly. The gate's lock is self-contained and nests inside no other
//! engine lock.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Result, SaveError};

/// Which slot pool an operation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Save,
    Load,
}

impl OperationKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Load => "load",
        }
    }
}

#[derive(Debug)]
struct Counters {
    saves_active: usize,
    loads_active: usize,
}

#[derive(Debug)]
struct GateInner {
    counters: Mutex<Counters>,
    released: Condvar,
    max_saves: usize,
    max_loads: usize,
}

impl GateInner {
    fn active(&self, counters: &Counters, kind: OperationKind) -> (usize, usize) {
        match kind {
            OperationKind::Save => (counters.saves_active, self.max_saves),
            OperationKind::Load => (counters.loads_active, self.max_loads),
        }
    }

    fn release(&self, kind: OperationKind) {
        let mut counters = match self.counters.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = match kind {
            OperationKind::Save => &mut counters.saves_active,
            OperationKind::Load => &mut counters.loads_active,
        };
        if *slot == 0 {
            // A double release would have to bypass the guard's flag.
            tracing::warn!(kind = kind.as_str(), "slot counter underflow detected");
        } else {
            *slot -= 1;
        }
        drop(counters);
        self.released.notify_all();
    }
}

/// Gate bounding concurrent saves and loads.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    pub fn new(max_saves: usize, max_loads: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                counters: Mutex::new(Counters {
                    saves_active: 0,
                    loads_active: 0,
                }),
                released: Condvar::new(),
                max_saves: max_saves.max(1),
                max_loads: max_loads.max(1),
            }),
        }
    }

    /// Acquires a slot, waiting up to `timeout`.
    ///
    /// A zero timeout never blocks: a full pool yields `Busy` immediately.
    /// Waiting past the timeout yields `Timeout`.
    pub fn acquire(&self, kind: OperationKind, timeout: Duration) -> Result<SlotGuard> {
        let started = Instant::now();
        let mut counters = match self.inner.counters.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };

        loop {
            let (active, max) = self.inner.active(&counters, kind);
            if active < max {
                match kind {
                    OperationKind::Save => counters.saves_active += 1,
                    OperationKind::Load => counters.loads_active += 1,
                }
                return Ok(SlotGuard {
                    gate: Arc::clone(&self.inner),
                    kind,
                    released: false,
                });
            }

            let remaining = match timeout.checked_sub(started.elapsed()) {
                Some(d) if !d.is_zero() => d,
                _ => {
                    return Err(if timeout.is_zero() {
                        SaveError::Busy {
                            kind: kind.as_str(),
                        }
                    } else {
                        SaveError::Timeout {
                            kind: kind.as_str(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        }
                    });
                }
            };

            let (guard, wait) = match self.inner.released.wait_timeout(counters, remaining) {
                Ok(r) => r,
                Err(poisoned) => {
                    let inner = poisoned.into_inner();
                    (inner.0, inner.1)
                }
            };
            counters = guard;
            if wait.timed_out() {
                let (active, max) = self.inner.active(&counters, kind);
                if active < max {
                    // Woke on the deadline just as a slot freed; take it.
                    continue;
                }
                return Err(SaveError::Timeout {
                    kind: kind.as_str(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    }

    /// Active slot counts `(saves, loads)`, for diagnostics.
    pub fn active(&self) -> (usize, usize) {
        let counters = match self.inner.counters.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        (counters.saves_active, counters.loads_active)
    }
}

/// RAII slot held by an in-flight operation.
///
/// Releasing is idempotent: an explicit `release()` followed by `Drop`
/// returns the slot once.
#[derive(Debug)]
pub struct SlotGuard {
    gate: Arc<GateInner>,
    kind: OperationKind,
    released: bool,
}

impl SlotGuard {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns the slot to the pool.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.gate.release(self.kind);
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}
