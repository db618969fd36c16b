//! Outbound cluster notifications.

use std::fmt;

use crate::id::SessionId;

/// Fire-and-forget signals telling other nodes to drop stale copies.
///
/// Implementations must not block the caller for long; they are invoked from
/// the request path and from the reaper.
pub trait ClusterNotifier: Send + Sync + fmt::Debug {
    /// The session was invalidated on this node.
    fn notify_invalidated(&self, id: &SessionId);

    /// The session's stored content changed.
    fn notify_updated(&self, id: &SessionId);
}

/// Notifier for single-node deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ClusterNotifier for NoopNotifier {
    fn notify_invalidated(&self, _id: &SessionId) {}

    fn notify_updated(&self, _id: &SessionId) {}
}
