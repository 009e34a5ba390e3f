//! Cross-context shared state.
//!
//! Subsystem state is mutated from two sides: the coordinator tick and the
//! external configuration facade. [`Shared`] wraps that state in a blocking
//! critical-section mutex so short in-memory updates are atomic on both
//! embedded targets and the host, without ever holding a lock across a bus
//! exchange.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Interior-mutable state guarded by a critical-section mutex.
///
/// Closures passed to `with`/`with_mut` run inside the critical section and
/// must therefore be short and must not perform bus I/O. The coordinator
/// follows a snapshot-plan-commit pattern around this constraint: it locks to
/// decide what to do, releases, exchanges on the bus, then locks again to
/// commit the result.
pub struct Shared<T> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<T>>,
}

impl<T> Shared<T> {
    /// Creates shared state wrapping the given value.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Access state immutably.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.lock(|cell| f(&cell.borrow()))
    }

    /// Access state mutably.
    pub fn with_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_mut_applies_changes() {
        let shared = Shared::new(41u32);
        shared.with_mut(|v| *v += 1);
        assert_eq!(shared.with(|v| *v), 42);
    }

    #[test]
    fn closure_return_value_passes_through() {
        let shared = Shared::new([1u16, 2, 3]);
        let sum: u16 = shared.with(|v| v.iter().sum());
        assert_eq!(sum, 6);
    }
}
