//! The retrieval mechanism behind the orchestrator.
//!
//! Each [`DownloadStrategy`] is one way of fetching a resource (a client
//! persona, a cookie source, a mirror). The orchestrator tries them in
//! order, so a strategy only has to answer for itself:
//!
//! - `Ok(Some(media))` with a file path: done.
//! - `Ok(None)`: nothing usable, try the next one.
//! - `Err(e)`: failed. Transient errors are retried inside the strategy
//!   before the orchestrator moves on; `HuginnError::Strategy` is not.
//!
//! # Example
//!
//! ```ignore
//! struct Mirror { base: String }
//!
//! #[async_trait]
//! impl DownloadStrategy for Mirror {
//!     fn name(&self) -> &str { "Mirror" }
//!
//!     async fn attempt(&self, id: &str, options: &DownloadOptions) -> Result<Option<RetrievedMedia>> {
//!         let path = fetch_to_disk(&self.base, id, options).await?;
//!         Ok(Some(RetrievedMedia::new(path, serde_json::json!({"title": id}))))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;

use super::types::{DownloadOptions, RetrievedMedia};
use crate::{HuginnError, Result};

/// One way of retrieving a resource.
#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    /// Display name, used in attempt records and aggregated errors.
    fn name(&self) -> &str;

    /// Try to retrieve `resource_id` to disk.
    async fn attempt(
        &self,
        resource_id: &str,
        options: &DownloadOptions,
    ) -> Result<Option<RetrievedMedia>>;

    /// Fetch the info document without downloading the artifact.
    ///
    /// Default: `Unsupported`, so the orchestrator skips to the next strategy.
    async fn probe(&self, _resource_id: &str) -> Result<Value> {
        Err(HuginnError::Unsupported)
    }
}
