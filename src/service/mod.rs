//! # Service Layer
//!
//! The connection-facing half of the crate: per-client sessions and the
//! server that accepts, registers, and dispatches them.
//!
//! ## Components
//! - **Session**: one per TCP connection; lifecycle state machine, reader and
//!   writer tasks, per-id packet handlers
//! - **Server**: listener, client registry, accept-timeout watchdog, and the
//!   single serial dispatch stream application callbacks run on

pub mod server;
pub mod session;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
