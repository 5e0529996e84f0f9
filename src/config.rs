//! Session configuration.

use std::time::Duration;

use crate::error::{MpcError, Result};
use crate::field::{Field, DEFAULT_MODULUS};
use crate::PartyId;

const DEFAULT_PARTY_COUNT: usize = 3;
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_PENDING_OPERATIONS: usize = 10_000;

/// Parameters of one computation session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the computation, used in logs only
    pub computation_id: String,
    /// Number of parties taking part (> 1)
    pub party_count: usize,
    /// Public prime modulus of the share field
    pub modulus: u64,
    /// Party id known up front; otherwise it arrives with the `init` message
    pub party_id: Option<PartyId>,
    /// Deadline for every pending share or open operation; `None` waits forever
    pub operation_timeout: Option<Duration>,
    /// Upper bound on simultaneously pending operations
    pub max_pending_operations: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            computation_id: "default".to_string(),
            party_count: DEFAULT_PARTY_COUNT,
            modulus: DEFAULT_MODULUS,
            party_id: None,
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
            max_pending_operations: DEFAULT_MAX_PENDING_OPERATIONS,
        }
    }
}

impl SessionConfig {
    pub fn new(computation_id: impl Into<String>, party_count: usize) -> Self {
        Self {
            computation_id: computation_id.into(),
            party_count,
            ..Default::default()
        }
    }

    pub fn with_modulus(mut self, modulus: u64) -> Self {
        self.modulus = modulus;
        self
    }

    pub fn with_party_id(mut self, party_id: PartyId) -> Self {
        self.party_id = Some(party_id);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_max_pending_operations(mut self, limit: usize) -> Self {
        self.max_pending_operations = limit;
        self
    }

    /// Checks the parameters and returns the field they describe.
    pub fn validate(&self) -> Result<Field> {
        if self.party_count < 2 {
            return Err(MpcError::InvalidConfig(format!(
                "party_count must be at least 2, got {}",
                self.party_count
            )));
        }
        let field = Field::new(self.modulus)?;
        // Party ids are evaluation points and must stay distinct and non-zero mod P.
        if self.party_count as u64 >= field.modulus() {
            return Err(MpcError::InvalidConfig(format!(
                "party_count {} must be smaller than the modulus {}",
                self.party_count, self.modulus
            )));
        }
        if let Some(id) = self.party_id {
            if id == 0 || id > self.party_count {
                return Err(MpcError::InvalidConfig(format!(
                    "party_id {} outside 1..={}",
                    id, self.party_count
                )));
            }
        }
        if self.max_pending_operations == 0 {
            return Err(MpcError::InvalidConfig(
                "max_pending_operations must be positive".to_string(),
            ));
        }
        Ok(field)
    }
}
