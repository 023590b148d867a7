//! Filesystem object storage: one directory per bucket under a root

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct FsBucketStore {
    root: PathBuf,
}

impl FsBucketStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of `bucket/name` under the root. The bucket must be a single
    /// plain segment and the name relative plain segments, so objects never
    /// resolve outside their bucket.
    pub fn object_path(&self, bucket: &str, name: &str) -> Result<PathBuf> {
        let bucket_ok = matches!(
            Path::new(bucket).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );
        let mut name_parts = Path::new(name).components().peekable();
        let name_ok = name_parts.peek().is_some()
            && name_parts.all(|c| matches!(c, Component::Normal(_)));

        if !bucket_ok || !name_ok {
            tracing::warn!(bucket, name, "rejecting object path outside the bucket");
            return Err(PipelineError::InvalidObjectPath {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }
        Ok(self.root.join(bucket).join(name))
    }

    /// Copy an object to `dest`, returning its size in bytes.
    pub async fn download(&self, bucket: &str, name: &str, dest: &Path) -> Result<u64> {
        let src = self.object_path(bucket, name)?;
        if !fs::try_exists(&src).await? {
            return Err(PipelineError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(fs::copy(&src, dest).await?)
    }

    /// Store a local file as `bucket/name`, returning its content hash.
    pub async fn upload(&self, local: &Path, bucket: &str, name: &str) -> Result<String> {
        let dest = self.object_path(bucket, name)?;
        let bytes = fs::read(local).await?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&dest, &bytes).await?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }
}
