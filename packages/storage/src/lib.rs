//! Object storage for build artifacts, job logs and input templates.
//!
//! Goal:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! Implementation note:
//! This is a small wrapper around `object_store`, which already provides
//! S3, local filesystem, and in-memory backends. Every backend's `put` is
//! atomic for readers: S3 single-part uploads only become visible once complete
//! and the local filesystem backend stages into a temp file before renaming.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;

mod publisher;

pub use publisher::{ArtifactStore, BoxFuture};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("local file does not exist: {0}")]
    MissingFile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
    /// Base URL handed out as the locator of stored objects, e.g. a CDN.
    pub public_base_url: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
            public_base_url: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
            public_base_url: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
            public_base_url: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/object_store`)
    ///
    /// S3 env vars (S3-compatible):
    /// - `S3_BUCKET` (required when backend is `s3`)
    /// - `AWS_REGION` (default: `ap-northeast-2`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional; also picked up from the ambient AWS environment by the SDK)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional, e.g. `fonts-prod/`)
    /// - `STORAGE_PUBLIC_BASE_URL` (optional locator base)
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_env_with_prefix("")
    }

    /// Same as [`StorageConfig::from_env`] with every storage variable name
    /// prefixed, e.g. `LOG_` reads `LOG_STORAGE_BACKEND`, `LOG_S3_BUCKET`.
    ///
    /// AWS credentials and region are shared and never prefixed.
    pub fn from_env_with_prefix(var_prefix: &str) -> Result<Self, StorageError> {
        Self::from_vars(var_prefix, |name| std::env::var(name).ok())
    }

    fn from_vars(
        var_prefix: &str,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StorageError> {
        let get = |name: &str| var(&format!("{var_prefix}{name}")).and_then(non_empty);

        let default_root = if var_prefix.is_empty() {
            PathBuf::from("./data/object_store")
        } else {
            let name = var_prefix.trim_matches('_').to_ascii_lowercase();
            PathBuf::from(format!("./data/{name}_store"))
        };
        let fs_root = || {
            get("STORAGE_FS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_root.clone())
        };

        let backend = get("STORAGE_BACKEND");
        let cfg = match backend.as_deref() {
            Some("s3") => Self::s3(read_s3_config(&get, &var)?),
            Some("filesystem") | Some("fs") | None => Self::filesystem(fs_root()),
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported {var_prefix}STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            prefix: get("STORAGE_PREFIX"),
            public_base_url: get("STORAGE_PUBLIC_BASE_URL"),
            ..cfg
        })
    }
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    locator_base: String,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .field("locator_base", &self.locator_base)
            .finish()
    }
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store, default_base): (_, Arc<dyn ObjectStore>, _) = match cfg.backend {
            StorageBackendConfig::S3(s3) => {
                let base = format!("https://{}.s3.{}.amazonaws.com", s3.bucket, s3.region);
                (StorageKind::S3, Arc::new(build_s3(s3).await?), base)
            }
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let root = std::fs::canonicalize(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                let base = format!("file://{}", root.display());
                (StorageKind::Filesystem, Arc::new(fs), base)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem), "memory://".to_string())
            }
        };

        let locator_base = cfg
            .public_base_url
            .and_then(non_empty)
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or(default_base);

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
            locator_base,
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                }
            }
            None => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    /// Retrieval locator of the object stored under `key`.
    pub fn locator(&self, key: &str) -> Result<String, StorageError> {
        let path = self.to_path(key)?;
        Ok(format!("{}/{}", self.locator_base, path.as_ref()))
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    /// Upload a local file under `key`, replacing any earlier object, and
    /// return its locator.
    pub async fn publish_file(&self, local_path: &FsPath, key: &str) -> Result<String, StorageError> {
        let bytes = match tokio::fs::read(local_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::MissingFile(local_path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = bytes.len();
        self.put_bytes(key, Bytes::from(bytes)).await?;
        let locator = self.locator(key)?;
        tracing::debug!(
            backend = self.kind_str(),
            key,
            size,
            "Uploaded {} to {}",
            local_path.display(),
            locator
        );
        Ok(locator)
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(var_name: &str, value: Option<String>) -> Result<Option<bool>, StorageError> {
    let Some(v) = value else {
        return Ok(None);
    };

    let normalized = v.trim().to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

fn read_s3_config(
    get: &impl Fn(&str) -> Option<String>,
    shared: &impl Fn(&str) -> Option<String>,
) -> Result<S3Config, StorageError> {
    let shared = |name: &str| shared(name).and_then(non_empty);

    let bucket = get("S3_BUCKET").ok_or_else(|| {
        StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
    })?;

    let region = shared("AWS_REGION").unwrap_or_else(|| "ap-northeast-2".to_string());

    let endpoint = get("S3_ENDPOINT");
    let allow_http = match parse_bool("S3_ALLOW_HTTP", get("S3_ALLOW_HTTP"))? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style =
        parse_bool("S3_VIRTUAL_HOSTED_STYLE", get("S3_VIRTUAL_HOSTED_STYLE"))?.unwrap_or(false);

    Ok(S3Config {
        bucket,
        region,
        endpoint,
        allow_http,
        access_key_id: shared("AWS_ACCESS_KEY_ID"),
        secret_access_key: shared("AWS_SECRET_ACCESS_KEY"),
        session_token: shared("AWS_SESSION_TOKEN"),
        virtual_hosted_style,
    })
}

async fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}
