//! Deterministic operation identifiers.
//!
//! Parties never negotiate identifiers. Each party numbers its own `share` and
//! `open` calls, and because every honest party issues the same calls in the
//! same order, the n-th call gets the same id everywhere. A message tagged
//! `open7` therefore belongs to the seventh protocol step on every party.
//!
//! A seed opens an independent numbering namespace (`<seed>:share0`, ...), so
//! that separate computations running side by side cannot collide as long as
//! every party seeds them identically.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::MpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Share,
    Open,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Share => "share",
            OpKind::Open => "open",
        }
    }
}

/// Identifier of one protocol step, rendered as `[<seed>:]<kind><sequence>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct OpId {
    pub seed: Option<u64>,
    pub kind: OpKind,
    pub sequence: u64,
}

impl OpId {
    pub fn new(seed: Option<u64>, kind: OpKind, sequence: u64) -> Self {
        OpId {
            seed,
            kind,
            sequence,
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(seed) = self.seed {
            write!(f, "{}:", seed)?;
        }
        write!(f, "{}{}", self.kind.as_str(), self.sequence)
    }
}

impl FromStr for OpId {
    type Err = MpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (seed, rest) = match s.split_once(':') {
            Some((seed, rest)) => {
                let seed = seed
                    .parse::<u64>()
                    .map_err(|_| MpcError::malformed(format!("bad op id seed in '{}'", s)))?;
                (Some(seed), rest)
            }
            None => (None, s),
        };

        let (kind, digits) = if let Some(d) = rest.strip_prefix("share") {
            (OpKind::Share, d)
        } else if let Some(d) = rest.strip_prefix("open") {
            (OpKind::Open, d)
        } else {
            return Err(MpcError::malformed(format!("unknown op kind in '{}'", s)));
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MpcError::malformed(format!("bad op sequence in '{}'", s)));
        }
        let sequence = digits
            .parse::<u64>()
            .map_err(|_| MpcError::malformed(format!("bad op sequence in '{}'", s)))?;

        Ok(OpId::new(seed, kind, sequence))
    }
}

impl From<OpId> for String {
    fn from(id: OpId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for OpId {
    type Error = MpcError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Per-session counters for operation and value ids.
#[derive(Debug, Default)]
pub struct OpSequencer {
    seed: Option<u64>,
    /// Next sequence number per namespace; never reset.
    counters: FxHashMap<Option<u64>, u64>,
    next_value: u64,
}

impl OpSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_op(&mut self, kind: OpKind) -> OpId {
        let counter = self.counters.entry(self.seed).or_insert(0);
        let id = OpId::new(self.seed, kind, *counter);
        *counter += 1;
        id
    }

    pub fn next_value_id(&mut self) -> u64 {
        let id = self.next_value;
        self.next_value += 1;
        id
    }

    /// Switches subsequent operations into the namespace of `seed`. Returning
    /// to a seed resumes where its numbering stopped.
    pub fn seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    /// Returns to the unseeded namespace.
    pub fn unseed(&mut self) {
        self.seed = None;
    }

    pub fn current_seed(&self) -> Option<u64> {
        self.seed
    }
}
