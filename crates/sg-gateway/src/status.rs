//! Read-only view of the connection state
//!
//! The supervisor is the only writer; everything else holds a
//! [`StatusReporter`] and reads the latest published value.

use tokio::sync::watch;

use sg_core::ConnectionState;

/// Create a connected publisher/reporter pair, starting `Disconnected`
pub fn channel() -> (StatusPublisher, StatusReporter) {
    let (tx, rx) = watch::channel(ConnectionState::Disconnected);
    (StatusPublisher { tx }, StatusReporter { rx })
}

/// Write side, owned by the supervisor
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<ConnectionState>,
}

impl StatusPublisher {
    /// Publish a new state; returns true if it differs from the previous one
    pub(crate) fn publish(&self, state: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }
}

/// Read side: cheap to clone, safe to query from any task
#[derive(Debug, Clone)]
pub struct StatusReporter {
    rx: watch::Receiver<ConnectionState>,
}

impl StatusReporter {
    /// Current connection state
    pub fn status(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    /// Wait for the next state change
    ///
    /// Returns `None` once the supervisor has gone away.
    pub async fn changed(&mut self) -> Option<ConnectionState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Wait until the state equals `target`
    ///
    /// Returns `None` if the supervisor goes away first.
    pub async fn wait_for(&mut self, target: ConnectionState) -> Option<ConnectionState> {
        self.rx.wait_for(|state| *state == target).await.ok().map(|s| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected() {
        let (_publisher, reporter) = channel();
        assert_eq!(reporter.status(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_publish_reports_changes_only() {
        let (publisher, reporter) = channel();
        assert!(publisher.publish(ConnectionState::Connecting));
        assert!(!publisher.publish(ConnectionState::Connecting));
        assert_eq!(reporter.status(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_changed_sees_new_state() {
        let (publisher, mut reporter) = channel();
        let waiter = tokio::spawn(async move { reporter.changed().await });
        publisher.publish(ConnectionState::Connected);
        assert_eq!(waiter.await.unwrap(), Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_changed_ends_when_publisher_dropped() {
        let (publisher, mut reporter) = channel();
        drop(publisher);
        assert_eq!(reporter.changed().await, None);
    }
}
