use core::fmt;

use statesync_primitives::Height;
use thiserror::Error;

/// Why a snapshot candidate was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RejectReason {
    /// The application rejected the snapshot offer.
    Snapshot,
    /// The application rejected every snapshot of this format.
    Format,
    /// The application rejected the peers serving this snapshot.
    Sender,
    /// The application rejected the snapshot while applying a chunk.
    ChunkRejected { index: u32 },
    ChunkRetriesExhausted { index: u32 },
    FetchRetriesExhausted { index: u32 },
    SnapshotRetriesExhausted,
    /// Every peer advertising the snapshot went away.
    NoPeers,
    /// The trust provider could not produce trusted data for the height.
    Provider(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("rejected by the application"),
            Self::Format => f.write_str("format rejected by the application"),
            Self::Sender => f.write_str("senders rejected by the application"),
            Self::ChunkRejected { index } => {
                write!(f, "rejected by the application at chunk {index}")
            }
            Self::ChunkRetriesExhausted { index } => {
                write!(f, "chunk {index} exhausted its apply retries")
            }
            Self::FetchRetriesExhausted { index } => {
                write!(f, "chunk {index} exhausted its fetch retries")
            }
            Self::SnapshotRetriesExhausted => f.write_str("snapshot exhausted its retries"),
            Self::NoPeers => f.write_str("no peers left serving the snapshot"),
            Self::Provider(err) => write!(f, "trusted state unavailable: {err}"),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("a state sync is already in progress")]
    AlreadyInProgress,

    #[error("no suitable snapshot found")]
    NoSnapshotFound,

    /// The application asked to abort state sync altogether.
    #[error("state sync aborted by the application")]
    Aborted,

    #[error("snapshot at height {height} format {format}: {reason}")]
    CandidateRejected {
        height: Height,
        format: u32,
        reason: RejectReason,
    },

    /// The restored application does not match the trusted state.
    #[error("snapshot at height {height} failed verification: {reason}")]
    VerificationFailed { height: Height, reason: String },

    #[error("no snapshot restore in progress")]
    NoRestoreInProgress,

    #[error("chunk for height {height} format {format} does not belong to the snapshot being restored")]
    UnexpectedChunk { height: Height, format: u32 },

    #[error("application connection failed")]
    Application(#[source] eyre::Report),
}

impl SyncError {
    /// Whether the current candidate should be dropped and the next one tried.
    #[must_use]
    pub const fn is_candidate_failure(&self) -> bool {
        matches!(
            self,
            Self::CandidateRejected { .. } | Self::VerificationFailed { .. }
        )
    }
}
