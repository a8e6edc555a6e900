//! Artifact publishing seam used by the job pipeline.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::{Storage, StorageError};

/// Future type for object-safe async storage calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable destination for a job's output files.
///
/// `publish` either returns the locator of a fully written object or an error;
/// callers never assume a partial object is durable.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Upload `local_path` under the deterministic `key` and return its locator.
    fn publish<'a>(&'a self, local_path: &'a Path, key: &'a str)
    -> BoxFuture<'a, Result<String, StorageError>>;
}

impl ArtifactStore for Storage {
    fn publish<'a>(
        &'a self,
        local_path: &'a Path,
        key: &'a str,
    ) -> BoxFuture<'a, Result<String, StorageError>> {
        Box::pin(self.publish_file(local_path, key))
    }
}
