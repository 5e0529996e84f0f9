//! Wire events and payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MpcError, Result};
use crate::op_id::{OpId, OpKind};
use crate::PartyId;

/// Named events exchanged over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Coordinator assigns this party its id; payload is the bare integer.
    Init,
    Share,
    Open,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Init => "init",
            Event::Share => "share",
            Event::Open => "open",
        }
    }

    /// The operation kind a fragment event carries, if any.
    pub fn op_kind(&self) -> Option<OpKind> {
        match self {
            Event::Init => None,
            Event::Share => Some(OpKind::Share),
            Event::Open => Some(OpKind::Open),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = MpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "init" => Ok(Event::Init),
            "share" => Ok(Event::Share),
            "open" => Ok(Event::Open),
            other => Err(MpcError::malformed(format!("unknown event '{}'", other))),
        }
    }
}

/// One party's fragment for one operation, as carried by `share` and `open`
/// events. Serialized as `{"party_id":1,"to":2,"op_id":"share0","share":42}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMessage {
    /// Sender of the fragment
    #[serde(rename = "party_id")]
    pub sender: PartyId,
    /// Intended recipient
    pub to: PartyId,
    pub op_id: OpId,
    pub share: u64,
}

impl FragmentMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
