//! Broadcaster
//!
//! Fans one encoded frame out to every established connection, the
//! sender of the original message included.

use crate::server::registry::{ConnectionId, ConnectionRegistry};

/// What happened during one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was handed to
    pub delivered: usize,
    /// Connections whose socket failed hard or whose output queue overflowed;
    /// the caller must remove them
    pub failed: Vec<ConnectionId>,
}

/// Write `frame` to every handshake-complete connection in registry order
///
/// A failing peer never stops delivery to the rest.
pub fn broadcast(registry: &mut ConnectionRegistry, frame: &[u8]) -> BroadcastReport {
    let targets: Vec<ConnectionId> = registry
        .all_except_listener()
        .filter(|c| c.is_handshake_complete())
        .map(|c| c.id())
        .collect();

    let mut report = BroadcastReport::default();
    for id in targets {
        match registry.send(id, frame) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Broadcast write failed");
                report.failed.push(id);
            }
        }
    }

    if report.delivered > 0 {
        tracing::trace!(
            recipients = report.delivered,
            bytes = frame.len(),
            "Broadcast frame"
        );
    }

    report
}
