//! Rolling persisted consensus state back by one height.
//!
//! State and block persistence do not happen atomically: a node can stop
//! after the block store wrote block `n` but before the state store moved to
//! `n`. Rollback reconciles that case, or rebuilds the state at `n - 1` from
//! the block store when both stores agree on `n`. Application state is not
//! touched.

use statesync_primitives::{Hash, Height, State, Version};
use thiserror::Error;
use tracing::{debug, info};

use crate::store::{BlockStore, StateStore};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RollbackError {
    #[error("no state found")]
    NoState,

    /// The stores disagree by more than one block; needs operator attention.
    #[error("statestore height ({state}) is not one below or equal to blockstore height ({block})")]
    InconsistentHeights { state: Height, block: Height },

    #[error("cannot roll back past height {0}")]
    AtInitialHeight(Height),

    #[error("block at height {0} not found")]
    BlockMetaNotFound(Height),

    #[error("failed to remove final block from blockstore")]
    DeleteBlock(#[source] eyre::Report),

    #[error("failed to save rolled back state")]
    SaveState(#[source] eyre::Report),

    #[error(transparent)]
    Store(eyre::Report),
}

/// Height and application hash of the state after a rollback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RolledBack {
    pub height: Height,
    pub app_hash: Hash,
}

/// Overwrites the current state (height `n`) with the previous state
/// (height `n - 1`). With `remove_block`, the block at `n` is deleted too, so
/// both stores end at `n - 1`.
///
/// All consistency checks run before the first write.
pub fn rollback<B, S>(
    block_store: &mut B,
    state_store: &mut S,
    remove_block: bool,
) -> Result<RolledBack, RollbackError>
where
    B: BlockStore + ?Sized,
    S: StateStore + ?Sized,
{
    let invalid_state = state_store
        .load()
        .map_err(RollbackError::Store)?
        .filter(|state| !state.is_empty())
        .ok_or(RollbackError::NoState)?;

    let height = block_store.height();

    // Dangling block: the block store is one ahead of the state store.
    if height == invalid_state.last_block_height.saturating_add(1) {
        info!(
            block_height = height,
            state_height = invalid_state.last_block_height,
            remove_block,
            "Block store is one block ahead, discarding pending block"
        );
        if remove_block {
            block_store
                .delete_latest_block()
                .map_err(RollbackError::DeleteBlock)?;
        }
        return Ok(RolledBack {
            height: invalid_state.last_block_height,
            app_hash: invalid_state.app_hash,
        });
    }

    if height != invalid_state.last_block_height {
        return Err(RollbackError::InconsistentHeights {
            state: invalid_state.last_block_height,
            block: height,
        });
    }

    let rollback_height = invalid_state
        .last_block_height
        .checked_sub(1)
        .filter(|h| *h >= invalid_state.initial_height)
        .ok_or(RollbackError::AtInitialHeight(invalid_state.last_block_height))?;

    let rollback_block = block_store
        .load_block_meta(rollback_height)
        .map_err(RollbackError::Store)?
        .ok_or(RollbackError::BlockMetaNotFound(rollback_height))?;

    // The app hash and last results hash of `rollback_height` are only
    // agreed upon in the following block.
    let latest_block = block_store
        .load_block_meta(invalid_state.last_block_height)
        .map_err(RollbackError::Store)?
        .ok_or(RollbackError::BlockMetaNotFound(invalid_state.last_block_height))?;

    let previous_last_validators = state_store
        .load_validators(rollback_height)
        .map_err(RollbackError::Store)?;

    let next_height = rollback_height.saturating_add(1);

    let previous_params = state_store
        .load_consensus_params(next_height)
        .map_err(RollbackError::Store)?;

    // Only possible if the validator set changed since the last block.
    let last_height_validators_changed = invalid_state
        .last_height_validators_changed
        .min(next_height.saturating_add(1));

    // Only possible if the params changed in the last block.
    let last_height_consensus_params_changed =
        if invalid_state.last_height_consensus_params_changed > rollback_height {
            next_height
        } else {
            invalid_state.last_height_consensus_params_changed
        };

    let rolled_back = State {
        version: Version::current(previous_params.version.app),

        chain_id: invalid_state.chain_id.clone(),
        initial_height: invalid_state.initial_height,

        last_block_height: rollback_block.header.height,
        last_block_id: rollback_block.block_id,
        last_block_time: rollback_block.header.time,

        next_validators: invalid_state.validators.clone(),
        validators: invalid_state.last_validators.clone(),
        last_validators: previous_last_validators,
        last_height_validators_changed,

        consensus_params: previous_params,
        last_height_consensus_params_changed,

        last_results_hash: latest_block.header.last_results_hash,
        app_hash: latest_block.header.app_hash,
    };

    state_store
        .save(&rolled_back)
        .map_err(RollbackError::SaveState)?;

    if remove_block {
        block_store
            .delete_latest_block()
            .map_err(RollbackError::DeleteBlock)?;
    }

    debug!(
        height = rolled_back.last_block_height,
        app_hash = %rolled_back.app_hash,
        remove_block,
        "Rolled back state"
    );

    Ok(RolledBack {
        height: rolled_back.last_block_height,
        app_hash: rolled_back.app_hash,
    })
}
