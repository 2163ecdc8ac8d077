//! Host port allocation.
//!
//! The host port space is shared across all deployments, so allocation
//! tracks an explicit assigned set with a free list instead of picking
//! at random. Ports return to the pool when their container is stopped.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::error::{RuntimeError, RuntimeResult};

/// Allocator over a fixed, inclusive host port range.
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    inner: Mutex<AllocatorState>,
}

#[derive(Debug)]
struct AllocatorState {
    free: VecDeque<u16>,
    assigned: HashSet<u16>,
}

impl PortAllocator {
    /// Create an allocator over `start..=end`.
    ///
    /// # Panics
    /// Panics if `start > end`; the range comes from validated config.
    #[must_use]
    pub fn new(start: u16, end: u16) -> Self {
        assert!(start <= end, "port range start must not exceed end");
        Self {
            start,
            end,
            inner: Mutex::new(AllocatorState {
                free: (start..=end).collect(),
                assigned: HashSet::new(),
            }),
        }
    }

    /// Take a port from the free set.
    pub fn allocate(&self) -> RuntimeResult<u16> {
        let mut state = self.inner.lock().expect("allocator lock poisoned");
        match state.free.pop_front() {
            Some(port) => {
                state.assigned.insert(port);
                Ok(port)
            }
            None => Err(RuntimeError::PortsExhausted {
                start: self.start,
                end: self.end,
            }),
        }
    }

    /// Return a port to the pool. Unknown ports are ignored so release
    /// stays idempotent.
    pub fn release(&self, port: u16) {
        let mut state = self.inner.lock().expect("allocator lock poisoned");
        if state.assigned.remove(&port) {
            state.free.push_back(port);
        }
    }

    /// Mark a port as in use (e.g. recovered from a running container).
    pub fn reserve(&self, port: u16) {
        let mut state = self.inner.lock().expect("allocator lock poisoned");
        if state.free.iter().any(|p| *p == port) {
            state.free.retain(|p| *p != port);
            state.assigned.insert(port);
        }
    }

    /// Number of ports currently assigned.
    #[must_use]
    pub fn assigned_count(&self) -> usize {
        self.inner.lock().expect("allocator lock poisoned").assigned.len()
    }
}
