use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::hash::Hash;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Validator {
    pub address: Hash,
    pub pub_key: Vec<u8>,
    pub voting_power: u64,
    pub proposer_priority: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
}

impl ValidatorSet {
    #[must_use]
    pub const fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    #[must_use]
    pub fn total_voting_power(&self) -> u64 {
        self.validators
            .iter()
            .fold(0_u64, |acc, v| acc.saturating_add(v.voting_power))
    }

    /// Digest over the canonical encoding of the set.
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::new();
        for validator in &self.validators {
            buf.extend_from_slice(validator.address.as_bytes());
            buf.extend_from_slice(&validator.pub_key);
            buf.extend_from_slice(&validator.voting_power.to_be_bytes());
        }
        Hash::digest(&buf)
    }
}
