//! The connection registry: who is connected right now, and where to
//! push their events.
//!
//! # Epochs
//!
//! Every registration gets a fresh, strictly increasing *epoch*. A
//! connection remembers its own [`Registration`] and hands it back when it
//! disconnects. The registry only removes the entry if the epoch still
//! matches, so a slow disconnect from an old connection can never evict
//! the newer one that replaced it:
//!
//! ```text
//! register(U, H1) → epoch 1
//! register(U, H2) → epoch 2   (H1 superseded and closed)
//! deregister(U, epoch 1)      → no-op, H2 stays
//! deregister(U, epoch 2)      → removed
//! ```
//!
//! # Concurrency note
//!
//! `ConnectionRegistry` is a plain `HashMap` with no locking of its own.
//! The presence engine owns exactly one and wraps it in a
//! `tokio::sync::Mutex`; nothing holds that lock across network I/O.

use std::collections::HashMap;

use tokio::sync::mpsc;
use waypoint_protocol::{Outbound, UserId};
use waypoint_transport::ConnectionId;

/// The sending half of one live connection.
///
/// The matching receiver is drained by that connection's writer task.
/// Cloning a handle clones the sender; the socket closes once every
/// clone is gone or an [`Outbound::Close`] is delivered.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: UserId,
    pub epoch: u64,
    pub conn_id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Queues `item` without waiting.
    ///
    /// # Errors
    /// Fails if the queue is full (slow reader) or the writer task is gone.
    pub fn try_push(&self, item: Outbound) -> Result<(), mpsc::error::TrySendError<Outbound>> {
        self.outbound.try_send(item)
    }

    /// Asks the writer task to close the socket.
    ///
    /// Best effort: if the queue is full the request is dropped, and the
    /// socket still closes once the last sender is dropped.
    pub fn close(&self) {
        if self.outbound.try_send(Outbound::Close).is_err() {
            tracing::debug!(
                user_id = %self.user_id,
                conn_id = %self.conn_id,
                "close request not queued"
            );
        }
    }

    /// Returns `true` if the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    pub fn registration(&self) -> Registration {
        Registration {
            user_id: self.user_id,
            epoch: self.epoch,
        }
    }
}

/// Proof of one particular registration. Handed back to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    pub user_id: UserId,
    pub epoch: u64,
}

/// Maps each user to at most one live connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<UserId, ConnectionHandle>,
    /// Epoch for the next registration. Starts at 1; never reused.
    next_epoch: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_epoch: 1,
        }
    }

    /// Registers a connection for `user_id`. Last connection wins.
    ///
    /// Returns the new registration and, if the user was already
    /// connected, the handle it replaced. The caller should
    /// [`close`](ConnectionHandle::close) that one.
    pub fn register(
        &mut self,
        user_id: UserId,
        conn_id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
    ) -> (Registration, Option<ConnectionHandle>) {
        // `Default` leaves next_epoch at 0; epochs start at 1 either way.
        let epoch = self.next_epoch.max(1);
        self.next_epoch = epoch + 1;

        let handle = ConnectionHandle {
            user_id,
            epoch,
            conn_id,
            outbound,
        };
        let superseded = self.entries.insert(user_id, handle);

        match &superseded {
            Some(old) => tracing::info!(
                %user_id,
                %conn_id,
                epoch,
                old_conn_id = %old.conn_id,
                "connection superseded"
            ),
            None => tracing::debug!(%user_id, %conn_id, epoch, "connection registered"),
        }

        (Registration { user_id, epoch }, superseded)
    }

    pub fn lookup(&self, user_id: UserId) -> Option<&ConnectionHandle> {
        self.entries.get(&user_id)
    }

    /// Removes the entry only if it still belongs to `registration`.
    ///
    /// Returns the removed handle, or `None` if the user has since
    /// reconnected (or was never registered).
    pub fn deregister_by_handle(&mut self, registration: &Registration) -> Option<ConnectionHandle> {
        let current = self.entries.get(&registration.user_id)?;
        if current.epoch != registration.epoch {
            tracing::debug!(
                user_id = %registration.user_id,
                stale_epoch = registration.epoch,
                current_epoch = current.epoch,
                "ignoring stale deregistration"
            );
            return None;
        }
        self.entries.remove(&registration.user_id)
    }

    /// Removes whatever connection `user_id` has, regardless of epoch.
    /// Used by logout.
    pub fn deregister_by_identity(&mut self, user_id: UserId) -> Option<ConnectionHandle> {
        self.entries.remove(&user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
