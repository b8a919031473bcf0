//! In-memory store implementations.

use std::collections::BTreeMap;

use eyre::{bail, OptionExt, Result};
use statesync_primitives::{BlockMeta, ConsensusParams, Height, State, ValidatorSet};

use crate::store::{BlockStore, StateStore};

#[derive(Clone, Debug, Default)]
pub struct MemoryBlockStore {
    blocks: BTreeMap<Height, BlockMeta>,
}

impl MemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `meta` at its header height. Heights must be appended in order.
    pub fn save_block_meta(&mut self, meta: BlockMeta) -> Result<()> {
        let height = meta.header.height;
        if let Some((&latest, _)) = self.blocks.last_key_value() {
            if height <= latest {
                bail!("block at height {height} is not above latest height {latest}");
            }
        }

        drop(self.blocks.insert(height, meta));

        Ok(())
    }
}

impl BlockStore for MemoryBlockStore {
    fn height(&self) -> Height {
        self.blocks.last_key_value().map_or(0, |(height, _)| *height)
    }

    fn load_block_meta(&self, height: Height) -> Result<Option<BlockMeta>> {
        Ok(self.blocks.get(&height).cloned())
    }

    fn delete_latest_block(&mut self) -> Result<()> {
        let _removed = self
            .blocks
            .pop_last()
            .ok_or_eyre("block store is empty")?;

        Ok(())
    }
}

/// Keeps validator sets and consensus parameters keyed by the height they
/// took effect at; lookups resolve to the latest entry at or below the
/// requested height.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore {
    state: Option<State>,
    validators: BTreeMap<Height, ValidatorSet>,
    params: BTreeMap<Height, ConsensusParams>,
    saves: usize,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_validators(&mut self, height: Height, validators: ValidatorSet) {
        drop(self.validators.insert(height, validators));
    }

    pub fn set_consensus_params(&mut self, height: Height, params: ConsensusParams) {
        drop(self.params.insert(height, params));
    }

    /// Number of [`StateStore::save`] calls so far.
    #[must_use]
    pub const fn save_count(&self) -> usize {
        self.saves
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<State>> {
        Ok(self.state.clone())
    }

    fn load_validators(&self, height: Height) -> Result<ValidatorSet> {
        self.validators
            .range(..=height)
            .next_back()
            .map(|(_, validators)| validators.clone())
            .ok_or_else(|| eyre::eyre!("no validator set found for height {height}"))
    }

    fn load_consensus_params(&self, height: Height) -> Result<ConsensusParams> {
        self.params
            .range(..=height)
            .next_back()
            .map(|(_, params)| *params)
            .ok_or_else(|| eyre::eyre!("no consensus params found for height {height}"))
    }

    fn save(&mut self, state: &State) -> Result<()> {
        let next = state.last_block_height.saturating_add(1);

        if next == state.initial_height {
            drop(self.validators.insert(next, state.validators.clone()));
        }
        drop(
            self.validators
                .insert(next.saturating_add(1), state.next_validators.clone()),
        );
        drop(self.params.insert(next, state.consensus_params));

        self.state = Some(state.clone());
        self.saves = self.saves.saturating_add(1);

        Ok(())
    }
}
