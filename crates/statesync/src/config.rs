//! State sync configuration with defaults.
//!
//! All tunables have a named `DEFAULT_*` constant. The config can be embedded
//! in a node's TOML configuration; missing fields fall back to defaults and
//! durations are written in milliseconds.

use std::time::Duration;

use eyre::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Default length of one snapshot discovery window (15 seconds)
pub const DEFAULT_DISCOVERY_TIME_SECS: u64 = 15;

/// Shortest non-zero discovery window accepted by [`StateSyncConfig::validate`]
pub const MIN_DISCOVERY_TIME_SECS: u64 = 5;

/// Default deadline of a single chunk request (10 seconds)
pub const DEFAULT_CHUNK_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default number of chunk requests outstanding at once
pub const DEFAULT_CHUNK_FETCHERS: usize = 4;

/// Default number of "retry this chunk" verdicts tolerated per chunk
pub const DEFAULT_CHUNK_RETRY_LIMIT: u32 = 3;

/// Default number of failed fetches (timeouts, missing) tolerated per chunk
pub const DEFAULT_CHUNK_FETCH_LIMIT: u32 = 16;

/// Default number of "retry whole snapshot" verdicts tolerated per snapshot
pub const DEFAULT_SNAPSHOT_RETRY_LIMIT: u32 = 3;

#[serde_as]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSyncConfig {
    /// Length of one discovery window: how long to collect advertisements
    /// after each snapshot request broadcast.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_time: Duration,

    /// Deadline of one in-flight chunk request before it is reassigned.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub chunk_request_timeout: Duration,

    /// Maximum chunk requests outstanding at once.
    pub chunk_fetchers: usize,

    /// Maximum "retry this chunk" verdicts for a single chunk.
    pub chunk_retry_limit: u32,

    /// Maximum failed fetches for a single chunk before the snapshot is dropped.
    pub chunk_fetch_limit: u32,

    /// Maximum "retry whole snapshot" verdicts for a single snapshot.
    pub snapshot_retry_limit: u32,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            discovery_time: Duration::from_secs(DEFAULT_DISCOVERY_TIME_SECS),
            chunk_request_timeout: Duration::from_secs(DEFAULT_CHUNK_REQUEST_TIMEOUT_SECS),
            chunk_fetchers: DEFAULT_CHUNK_FETCHERS,
            chunk_retry_limit: DEFAULT_CHUNK_RETRY_LIMIT,
            chunk_fetch_limit: DEFAULT_CHUNK_FETCH_LIMIT,
            snapshot_retry_limit: DEFAULT_SNAPSHOT_RETRY_LIMIT,
        }
    }
}

impl StateSyncConfig {
    /// Sanity checks for operator-supplied values.
    pub fn validate(&self) -> Result<()> {
        if !self.discovery_time.is_zero()
            && self.discovery_time < Duration::from_secs(MIN_DISCOVERY_TIME_SECS)
        {
            bail!(
                "discovery_time must be 0 or at least {MIN_DISCOVERY_TIME_SECS}s, got {:?}",
                self.discovery_time
            );
        }
        if self.chunk_request_timeout.is_zero() {
            bail!("chunk_request_timeout must be greater than 0");
        }
        if self.chunk_fetchers == 0 {
            bail!("chunk_fetchers must be greater than 0");
        }
        if self.chunk_retry_limit == 0 || self.chunk_fetch_limit == 0 || self.snapshot_retry_limit == 0 {
            bail!("retry limits must be greater than 0");
        }

        Ok(())
    }

    /// How often the chunk fetcher wakes up to look for expired requests.
    pub(crate) fn fetch_tick(&self) -> Duration {
        (self.chunk_request_timeout / 4).max(Duration::from_millis(1))
    }
}
