use async_trait::async_trait;
use eyre::Result;
use statesync_primitives::{Commit, Hash, Height, State};

/// Source of trusted, light-client verified chain data.
///
/// State sync never trusts what peers or the application report about the
/// chain; everything it commits to comes from here.
#[async_trait]
pub trait StateProvider: Send + Sync {
    /// Trusted application hash after executing block `height`.
    async fn app_hash(&self, height: Height) -> Result<Hash>;

    /// Consensus state right after `height`, to bootstrap the node with.
    async fn state(&self, height: Height) -> Result<State>;

    async fn commit(&self, height: Height) -> Result<Commit>;
}
