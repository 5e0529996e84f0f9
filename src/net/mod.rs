//! Networking boundary: wire messages, the transport trait, and an in-process
//! network for running several parties in one runtime.

pub mod local;
pub mod message;
pub mod transport;

pub use local::{spawn_receiver, Envelope, LocalNetwork};
pub use message::{Event, FragmentMessage};
pub use transport::Transport;
