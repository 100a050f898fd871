//! Synchronized Module
//!
//! A value behind a single serial critical section.
//!
//! Every caller enters the section on its own thread, so there is no hop to a
//! separate context and nothing to elide for a "home" thread. The one case
//! that would still self-deadlock, a thread entering the cell while it already
//! holds it, is detected and reported instead of hanging.

use std::thread::{self, ThreadId};

use parking_lot::Mutex;

/// Serialized access to a `T`.
///
/// Reads and writes share one section; decisions such as "was the queue
/// empty?" are linearizable with the mutation that follows them.
pub struct Synchronized<T> {
    value: Mutex<T>,
    holder: Mutex<Option<ThreadId>>,
    label: String,
}

impl<T> Synchronized<T> {
    pub fn new(value: T) -> Self {
        Self::with_label(value, format!("synchronized.{}", std::any::type_name::<T>()))
    }

    /// `label` identifies the cell in diagnostics.
    pub fn with_label(value: T, label: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(value),
            holder: Mutex::new(None),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `mutator` with exclusive access, blocking until any other access
    /// completes. The mutator's return value is handed back to the caller.
    ///
    /// # Panics
    ///
    /// If called from inside another `access`/`read` on the same cell and
    /// thread. Blocking there could never succeed.
    pub fn access<R>(&self, mutator: impl FnOnce(&mut T) -> R) -> R {
        let current = thread::current().id();
        if *self.holder.lock() == Some(current) {
            panic!("re-entrant access to synchronized cell `{}`", self.label);
        }

        let mut guard = self.value.lock();
        *self.holder.lock() = Some(current);
        let _holder = HolderReset(&self.holder);
        mutator(&mut guard)
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        self.access(|slot| *slot = value);
    }

    /// Replace the value, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        self.access(|slot| std::mem::replace(slot, value))
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Clone> Synchronized<T> {
    /// Snapshot of the current value.
    pub fn read(&self) -> T {
        self.access(|value| value.clone())
    }
}

impl<T: Default> Default for Synchronized<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Synchronized<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronized")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Clears the holder even if the mutator unwinds.
struct HolderReset<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for HolderReset<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}
