//! Connectivity monitor backed by a watch channel.
//!
//! The platform layer (reachability callbacks, network extensions) drives
//! `set_online`; the sync services poll `is_online` and subscribe to
//! transition events.

use tokio::sync::watch;
use tracing::info;
use waypoint_core::ConnectivityMonitor;

/// Watch-channel connectivity monitor.
pub struct WatchConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl WatchConnectivityMonitor {
    /// Create a monitor with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Report the current reachability state.
    ///
    /// Subscribers are only notified on actual transitions; repeated
    /// reports of the same state are absorbed.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }
    }
}

impl Default for WatchConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor for WatchConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the connectivity monitor.
    use super::*;

    #[tokio::test]
    async fn reports_current_state() {
        let monitor = WatchConnectivityMonitor::new(false);
        assert!(!monitor.is_online());

        monitor.set_online(true);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let monitor = WatchConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn repeated_reports_are_absorbed() {
        let monitor = WatchConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap(), "Same-state report must not notify");

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
    }
}
