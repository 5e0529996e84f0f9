pub mod config;
pub mod error;
pub mod field;
pub mod net;
pub mod op_id;
pub mod pending;
mod router;
pub mod session;
pub mod sharing;
#[cfg(test)]
mod tests;

/// Index of a party in `1..=party_count`.
pub type PartyId = usize;

pub use config::SessionConfig;
pub use error::{MpcError, Result};
pub use field::Field;
pub use pending::PendingValue;
pub use session::{Opening, Session};
