use async_trait::async_trait;

use super::error::PageResult;

/// One exclusive browser tab. Selectors are CSS; `key` names the timeout
/// budget the actor waits under.
#[async_trait]
pub trait PageActor: Send + Sync {
    async fn open(&self, url: &str) -> PageResult<()>;

    async fn find(&self, selector: &str, key: &str) -> PageResult<()>;

    async fn click(&self, selector: &str, key: &str) -> PageResult<()>;

    async fn fill(&self, selector: &str, value: &str, key: &str) -> PageResult<()>;

    async fn read_text(&self, selector: &str, key: &str) -> PageResult<String>;

    async fn current_url(&self) -> PageResult<String>;

    /// Whether `selector` shows up within the `key` budget. Missing elements
    /// and timeouts read as `false`; everything else propagates.
    async fn probe(&self, selector: &str, key: &str) -> PageResult<bool> {
        match self.find(selector, key).await {
            Ok(()) => Ok(true),
            Err(super::PageError::NotFound { .. }) | Err(super::PageError::Timeout { .. }) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
