//! Network reachability monitor.
//!
//! The core does not probe the network itself; platform shells observe OS
//! connectivity and feed transitions into this monitor. Consumers read the
//! current flag or subscribe to transitions.

use tokio::sync::watch;

/// Publish-on-change holder for the online/offline signal
#[derive(Debug)]
pub struct ReachabilityMonitor {
    tx: watch::Sender<bool>,
}

impl ReachabilityMonitor {
    /// Create a monitor with the given initial state
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    /// Record a connectivity transition; no-op when unchanged
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::debug!("Reachability changed: online={online}");
        }
    }

    /// Current connectivity flag
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to connectivity transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
