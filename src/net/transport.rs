//! The outbound side of a party's connection.
//!
//! The engine never owns sockets. Whatever carries messages between parties
//! (a relay server, a QUIC mesh, in-process channels) implements
//! [`Transport`] and feeds inbound events to [`Session::process`].
//!
//! [`Session::process`]: crate::session::Session::process

use crate::net::message::Event;
use crate::PartyId;

/// Delivers named events to other parties.
pub trait Transport: Send + Sync {
    /// Sends `payload` under `event` to party `to`. Must not block; delivery
    /// failures that happen later are the transport's own concern.
    fn send(&self, to: PartyId, event: Event, payload: String) -> Result<(), String>;
}
