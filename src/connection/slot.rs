//! Connect-once holder for a transport handle.
//!
//! The handle lives behind a [`RwLock`]. Channel operations only need a read
//! guard to borrow the handle, while filling and emptying the slot take the
//! write lock. Because the first connect runs under the write lock, callers
//! racing to connect dial exactly once and the losers reuse the winner's handle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::trace;

/// Holds at most one connected handle.
///
/// Invariant: the handle is present iff [`is_connected`](Self::is_connected)
/// reports `true`.
pub struct ConnectionSlot<T> {
    handle: RwLock<Option<T>>,
    connected: AtomicBool,
}

impl<T> ConnectionSlot<T> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            handle: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Whether a handle is currently stored.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Borrow the stored handle, running `connect` first if the slot is empty.
    ///
    /// A failed `connect` leaves the slot empty so the next call dials again.
    /// Hold the returned guard only as long as the handle is needed: `take`
    /// waits for every outstanding guard.
    pub async fn get_or_connect<F, Fut, E>(&self, mut connect: F) -> Result<RwLockReadGuard<'_, T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            let guard = self.handle.read().await;
            match RwLockReadGuard::try_map(guard, Option::as_ref) {
                Ok(handle) => return Ok(handle),
                Err(guard) => drop(guard),
            }

            let mut guard = self.handle.write().await;
            if guard.is_none() {
                trace!("Connection slot empty, connecting");
                *guard = Some(connect().await?);
                self.connected.store(true, Ordering::SeqCst);
            }

            // Downgrading keeps the lock, so the handle cannot be taken in between.
            if let Ok(handle) = RwLockReadGuard::try_map(guard.downgrade(), Option::as_ref) {
                return Ok(handle);
            }
        }
    }

    /// Remove and return the handle, leaving the slot empty.
    pub async fn take(&self) -> Option<T> {
        let mut guard = self.handle.write().await;
        self.connected.store(false, Ordering::SeqCst);
        guard.take()
    }
}

impl<T> Default for ConnectionSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
