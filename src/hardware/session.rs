//! Exclusive ownership of the device session.
//!
//! There is exactly one device session per process. Whoever issues device
//! commands must hold a [`SessionLease`]: the run loop holds one for its whole
//! lifetime, the supervisor takes one for register reads, saves and shutdown.
//! Taking a lease while a run holds it waits until the run has released it,
//! which happens only after the run reached a terminal state.

use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::capabilities::DeviceSession;

/// Shared cell holding the process-wide device session.
#[derive(Clone)]
pub struct SessionCell {
    inner: Arc<Mutex<Arc<dyn DeviceSession>>>,
}

impl SessionCell {
    /// Wrap a device session.
    pub fn new(session: Arc<dyn DeviceSession>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Wait for exclusive access to the session.
    pub async fn lease(&self) -> SessionLease {
        SessionLease {
            guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Take the session only if nobody else holds it.
    pub fn try_lease(&self) -> Option<SessionLease> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| SessionLease { guard })
    }

    /// Whether a lease is currently outstanding.
    pub fn is_leased(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Exclusive access to the device session; released on drop.
pub struct SessionLease {
    guard: OwnedMutexGuard<Arc<dyn DeviceSession>>,
}

impl Deref for SessionLease {
    type Target = dyn DeviceSession;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockActuator;

    #[tokio::test]
    async fn lease_is_exclusive_until_dropped() {
        let cell = SessionCell::new(Arc::new(MockActuator::new()));

        let lease = cell.lease().await;
        assert!(cell.is_leased());
        assert!(cell.try_lease().is_none());

        drop(lease);
        assert!(!cell.is_leased());
        assert!(cell.try_lease().is_some());
    }

    #[tokio::test]
    async fn lease_derefs_to_session() {
        let cell = SessionCell::new(Arc::new(MockActuator::new()));
        let lease = cell.lease().await;
        let ids = lease.enumerate().await.unwrap();
        assert!(!ids.is_empty());
    }
}
