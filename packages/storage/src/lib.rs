//! Blob store access for the ingestion consumer.
//!
//! Goal:
//! - S3-compatible storage in production/staging, one client per bucket
//! - On-disk storage for local dev (`<root>/<bucket>/<key>`)
//! - In-memory storage for tests
//!
//! Implementation note:
//! This is a small wrapper around `object_store`, which already provides
//! S3, local filesystem, and in-memory backends. The consumer only needs
//! [`BlobStore::get`] plus [`fetch_to_file`]; the other methods exist for
//! seeding and local tooling.

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(object_store::Error),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::ObjectStore(other),
        }
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Stream of object bytes as returned by [`BlobStore::get`].
pub type BlobStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Read access to a blob store, shared by all workers.
///
/// Implementations must be safe for concurrent independent use.
pub trait BlobStore: Send + Sync + 'static {
    /// Open a byte stream for the object at `key` in `container`.
    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<BlobStream, StorageError>>;
}

/// Stream an object into `dest`, creating or truncating it.
///
/// Returns the number of bytes written.
pub async fn fetch_to_file(
    store: &dyn BlobStore,
    container: &str,
    key: &str,
    dest: &FsPath,
) -> Result<u64, StorageError> {
    let mut stream = store.get(container, key).await?;
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;

    tracing::debug!(container, key, bytes = written, "Fetched object to {:?}", dest);
    Ok(written)
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

/// S3 client settings shared by every bucket the consumer reads from.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

impl StorageConfig {
    pub fn memory() -> Self {
        StorageConfig::Memory
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        StorageConfig::Filesystem { root: root.into() }
    }

    pub fn s3(cfg: S3Config) -> Self {
        StorageConfig::S3(cfg)
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to s3
    ///
    /// S3 env vars (S3-compatible):
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    ///
    /// Buckets are not configured here; each notification names its own.
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok().and_then(non_empty);

        match backend.as_deref() {
            Some("s3") | None => Ok(Self::s3(read_s3_config()?)),
            Some("filesystem") | Some("fs") => {
                let root = std::env::var("STORAGE_FS_ROOT")
                    .ok()
                    .and_then(non_empty)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/object_store"));
                Ok(Self::filesystem(root))
            }
            Some("memory") | Some("mem") => Ok(Self::memory()),
            Some(other) => Err(StorageError::InvalidConfig(format!(
                "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
            ))),
        }
    }
}

enum Backend {
    /// Per-bucket clients, built on first use.
    S3 {
        template: S3Config,
        buckets: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    },
    /// One store for every container; the container is the first path segment.
    Shared(Arc<dyn ObjectStore>),
}

/// `object_store`-backed blob store.
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    backend: Arc<Backend>,
}

impl Storage {
    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, backend) = match cfg {
            StorageConfig::S3(template) => (
                StorageKind::S3,
                Backend::S3 {
                    template,
                    buckets: RwLock::new(HashMap::new()),
                },
            ),
            StorageConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Backend::Shared(Arc::new(fs)))
            }
            StorageConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Backend::Shared(Arc::new(mem)))
            }
        };

        Ok(Self {
            kind,
            backend: Arc::new(backend),
        })
    }

    pub fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?)
    }

    /// Resolve the store and in-store path for an object.
    fn locate(&self, container: &str, key: &str) -> Result<(Arc<dyn ObjectStore>, Path), StorageError> {
        let container = container.trim_matches('/');
        if container.is_empty() {
            return Err(StorageError::InvalidConfig(
                "container must not be empty".to_string(),
            ));
        }
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        match self.backend.as_ref() {
            Backend::S3 { template, buckets } => {
                let store = bucket_store(template, buckets, container)?;
                Ok((store, Path::from(key)))
            }
            Backend::Shared(store) => Ok((store.clone(), Path::from(format!("{container}/{key}")))),
        }
    }

    pub async fn put_bytes(&self, container: &str, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let (store, path) = self.locate(container, key)?;
        store.put(&path, object_store::PutPayload::from(bytes)).await?;
        Ok(())
    }

    pub async fn get_bytes(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        let (store, path) = self.locate(container, key)?;
        let res = store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    pub async fn delete(&self, container: &str, key: &str) -> Result<(), StorageError> {
        let (store, path) = self.locate(container, key)?;
        store.delete(&path).await?;
        Ok(())
    }
}

impl BlobStore for Storage {
    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<BlobStream, StorageError>> {
        async move {
            let (store, path) = self.locate(container, key)?;
            let res = store.get(&path).await?;
            Ok(res.into_stream().map_err(StorageError::from).boxed())
        }
        .boxed()
    }
}

fn bucket_store(
    template: &S3Config,
    buckets: &RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    bucket: &str,
) -> Result<Arc<dyn ObjectStore>, StorageError> {
    if let Some(store) = buckets
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(bucket)
    {
        return Ok(store.clone());
    }

    let mut guard = buckets.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(store) = guard.get(bucket) {
        return Ok(store.clone());
    }
    tracing::info!(bucket, "Creating S3 client");
    let store: Arc<dyn ObjectStore> = Arc::new(build_s3(template, bucket)?);
    guard.insert(bucket.to_string(), store.clone());
    Ok(store)
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

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
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

fn read_s3_config() -> Result<S3Config, StorageError> {
    let region = std::env::var("AWS_REGION")
        .ok()
        .and_then(non_empty)
        .unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = std::env::var("S3_ENDPOINT").ok().and_then(non_empty);
    let allow_http = match parse_bool_env("S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style = parse_bool_env("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);

    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().and_then(non_empty);
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .ok()
        .and_then(non_empty);
    let session_token = std::env::var("AWS_SESSION_TOKEN").ok().and_then(non_empty);

    Ok(S3Config {
        region,
        endpoint,
        allow_http,
        access_key_id,
        secret_access_key,
        session_token,
        virtual_hosted_style,
    })
}

fn build_s3(cfg: &S3Config, bucket: &str) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(&cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = &cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = &cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = &cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = &cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}
