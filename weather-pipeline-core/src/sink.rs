use std::{fmt::Debug, fs, path::PathBuf, sync::Arc};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    ObjectStore, ObjectStoreExt, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory,
    path::Path,
};
use tracing::debug;

use crate::error::Result;

/// Where an object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Fully qualified location, e.g. `s3://bucket/prefix/name.csv`.
    pub location: String,
    pub size: usize,
}

/// Append-only object sink: every write creates a new named object.
#[async_trait]
pub trait Sink: Send + Sync + Debug {
    async fn write(&self, name: &str, body: Bytes) -> Result<StoredObject>;
}

/// Parsed form of a sink URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    S3 { bucket: String, prefix: String },
    Local { root: PathBuf },
    Memory,
}

impl SinkTarget {
    /// Accepts `s3://bucket[/prefix]`, `file:///dir`, `memory://` or a bare path.
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(anyhow!("Sink URL is empty"));
        }

        if let Some(rest) = url.strip_prefix("s3://") {
            let rest = rest.trim_matches('/');
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(anyhow!("Sink URL '{url}' has no bucket name"));
            }
            return Ok(SinkTarget::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.trim_matches('/').to_string(),
            });
        }

        if let Some(path) = url.strip_prefix("file://") {
            return Ok(SinkTarget::Local { root: PathBuf::from(path) });
        }

        if url == "memory://" || url == "memory:" {
            return Ok(SinkTarget::Memory);
        }

        if let Some((scheme, _)) = url.split_once("://") {
            return Err(anyhow!(
                "Unsupported sink scheme '{scheme}'. Supported: s3://, file://, memory://"
            ));
        }

        Ok(SinkTarget::Local { root: PathBuf::from(url) })
    }
}

/// `Sink` over any `ObjectStore`, writing under a fixed key prefix.
#[derive(Debug, Clone)]
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    display_root: String,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, display_root: impl Into<String>) -> Self {
        Self {
            store,
            prefix: Path::from(prefix),
            display_root: display_root.into(),
        }
    }

    /// Build a sink from a URL. S3 credentials and region come from the usual `AWS_*` env vars.
    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        let target = SinkTarget::parse(url)?;
        Self::from_target(&target)
    }

    pub fn from_target(target: &SinkTarget) -> anyhow::Result<Self> {
        let sink = match target {
            SinkTarget::S3 { bucket, prefix } => {
                let s3 = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .with_context(|| format!("Failed to configure S3 client for bucket '{bucket}'"))?;
                Self::new(Arc::new(s3), prefix, format!("s3://{bucket}"))
            }
            SinkTarget::Local { root } => {
                fs::create_dir_all(root).with_context(|| {
                    format!("Failed to create sink directory: {}", root.display())
                })?;
                let local = LocalFileSystem::new_with_prefix(root).with_context(|| {
                    format!("Failed to open sink directory: {}", root.display())
                })?;
                Self::new(Arc::new(local), "", format!("file://{}", root.display()))
            }
            SinkTarget::Memory => Self::new(Arc::new(InMemory::new()), "", "memory://"),
        };

        Ok(sink)
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Key an object name resolves to inside the store.
    pub fn key_for(&self, name: &str) -> Path {
        self.prefix.child(name)
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    async fn write(&self, name: &str, body: Bytes) -> Result<StoredObject> {
        let key = self.key_for(name);
        let size = body.len();

        debug!(key = %key, size, "Writing object");
        self.store.put(&key, body.into()).await?;

        let location = if self.display_root.ends_with('/') {
            format!("{}{key}", self.display_root)
        } else {
            format!("{}/{key}", self.display_root)
        };

        Ok(StoredObject { location, size })
    }
}
