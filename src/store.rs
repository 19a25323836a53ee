// src/store.rs

use aws_sdk_s3::primitives::ByteStream;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::fs;
use tracing::{debug, info};

use crate::config::HistoryLocation;
use crate::error::{IngestError, Result};
use crate::frame::Frame;

/// Key-addressed blob storage for the historical CSV.
///
/// `write` replaces the whole object; there is no partial update and no
/// concurrency control, so only one run should touch a key at a time.
#[allow(async_fn_in_trait)]
pub trait HistoryStore {
    /// `Ok(None)` when nothing is stored under `key` yet.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn write(&self, key: &str, body: Vec<u8>) -> Result<()>;
}

/// Load the history table; a missing object is an empty table.
pub async fn load_history<S: HistoryStore>(store: &S, key: &str) -> Result<Frame> {
    match store.read(key).await? {
        Some(bytes) => {
            let frame = Frame::from_csv_bytes(&bytes)?;
            debug!(key, rows = frame.len(), "loaded history");
            Ok(frame)
        }
        None => {
            info!(key, "no history stored yet");
            Ok(Frame::default())
        }
    }
}

pub async fn save_history<S: HistoryStore>(store: &S, key: &str, frame: &Frame) -> Result<()> {
    store.write(key, frame.to_csv_bytes()?).await
}

// ─── S3 ──────────────────────────────────────────────────────────────

pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the standard AWS environment/credential chain.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let conf = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&conf), bucket)
    }

    fn store_error<E>(&self, key: &str, err: E) -> IngestError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        IngestError::Store {
            key: format!("s3://{}/{}", self.bucket, key),
            source: Box::new(err),
        }
    }
}

impl HistoryStore for S3Store {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        debug!(bucket = %self.bucket, key, "fetching history object");
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None)
            }
            Err(err) => return Err(self.store_error(key, err)),
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| self.store_error(key, e))?;
        Ok(Some(bytes.into_bytes().to_vec()))
    }

    async fn write(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("text/csv")
            .send()
            .await
            .map_err(|e| self.store_error(key, e))?;
        info!(bucket = %self.bucket, key, size, "wrote history object");
        Ok(())
    }
}

// ─── local directory ─────────────────────────────────────────────────

/// Stores each key as a file under `dir`.
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl HistoryStore for LocalStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to `<key>.tmp` and rename over the target.
    async fn write(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let final_path = self.path(key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = final_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &body).await?;
        fs::rename(&tmp, &final_path).await?;
        info!(path = %final_path.display(), size = body.len(), "wrote history file");
        Ok(())
    }
}

// ─── in memory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, key: &str, body: Vec<u8>) -> Self {
        self.objects
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), body);
        self
    }

    fn objects(&self, key: &str) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects.lock().map_err(|_| IngestError::Store {
            key: format!("memory://{}", key),
            source: "memory store lock poisoned".into(),
        })
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects(key).ok()?.get(key).cloned()
    }
}

impl HistoryStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects(key)?.get(key).cloned())
    }

    async fn write(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.objects(key)?.insert(key.to_string(), body);
        Ok(())
    }
}

// ─── configured backend ──────────────────────────────────────────────

/// The store selected by [`HistoryLocation`].
pub enum Backend {
    S3(S3Store),
    Local(LocalStore),
}

impl Backend {
    pub async fn connect(location: &HistoryLocation) -> Self {
        match location {
            HistoryLocation::S3 { bucket, .. } => Backend::S3(S3Store::from_env(bucket.clone()).await),
            HistoryLocation::Local { dir, .. } => Backend::Local(LocalStore::new(dir.clone())),
        }
    }
}

impl HistoryStore for Backend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Backend::S3(s) => s.read(key).await,
            Backend::Local(s) => s.read(key).await,
        }
    }

    async fn write(&self, key: &str, body: Vec<u8>) -> Result<()> {
        match self {
            Backend::S3(s) => s.write(key, body).await,
            Backend::Local(s) => s.write(key, body).await,
        }
    }
}
