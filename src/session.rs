//! Communication session management
//!
//! This module defines the trait for tunneling messages between the session
//! coordinator and connected clients (participants and hosts). The tunnel
//! abstraction allows for different communication mechanisms while
//! maintaining a consistent interface.

use super::coordinator::{SyncMessage, UpdateMessage};

/// Trait for sending messages through a communication tunnel
///
/// This trait abstracts the communication mechanism used to send messages
/// to connected clients. Implementations might use WebSockets, Server-Sent
/// Events, or other real-time communication protocols.
pub trait Tunnel {
    /// Sends an update message to the client
    ///
    /// Update messages notify clients about incremental changes that affect
    /// their current view of the session.
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a state synchronization message to the client
    ///
    /// Sync messages carry the full state a client needs to resynchronize
    /// its view, typically when it connects or reconnects. Recovering via a
    /// single sync message bounds reconnection cost; missed incremental
    /// updates are never replayed.
    fn send_state(&self, state: &SyncMessage);

    /// Closes the communication tunnel
    ///
    /// This method should be called when the client disconnects or
    /// when the communication is no longer needed.
    fn close(self);
}
