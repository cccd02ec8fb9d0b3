//! Network reachability tracking.
//!
//! [`Connectivity`] is a cheap, cloneable handle over a shared online flag.
//! Transitions are broadcast as [`ConnectivityEvent`]s; repeated reports of
//! the same state are swallowed so that subscribers only see edges.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// A change in reachability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameLost,
}

#[derive(Clone, Debug)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            online: Arc::new(AtomicBool::new(online)),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record the current reachability.
    ///
    /// Returns the event emitted, or `None` if the state did not change.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return None;
        }

        let event = if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameLost
        };
        tracing::info!(?event, "connectivity changed");
        // No subscribers is fine
        let _ = self.events.send(event);
        Some(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_edges_are_emitted() {
        let connectivity = Connectivity::new(false);
        let mut events = connectivity.subscribe();

        assert_eq!(connectivity.set_online(false), None);
        assert_eq!(
            connectivity.set_online(true),
            Some(ConnectivityEvent::BecameOnline)
        );
        assert_eq!(connectivity.set_online(true), None);
        assert_eq!(
            connectivity.set_online(false),
            Some(ConnectivityEvent::BecameLost)
        );

        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::BecameOnline);
        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::BecameLost);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let a = Connectivity::new(true);
        let b = a.clone();
        b.set_online(false);
        assert!(!a.is_online());
    }
}
