//! State repository: one JSON snapshot document behind a bucket/key address.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use idpscim_core::State;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{FetchError, HttpFetcher};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state object request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("decoding state document from {location}: {source}")]
    Decode {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding state document: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Durable single-object store for the last reconciled snapshot.
///
/// `get` returns `Ok(None)` when no snapshot exists yet; that is the first-run
/// signal, not an error. `put` replaces the whole object.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn get(&self) -> Result<Option<State>, StateError>;
    async fn put(&self, state: &State) -> Result<(), StateError>;
    fn location(&self) -> String;
}

fn io_err<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(std::io::Error) -> StateError + 'a {
    move |source| StateError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

async fn write_synced(file: &mut fs::File, path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    file.write_all(bytes)
        .await
        .map_err(io_err("writing temp state file", path))?;
    file.flush()
        .await
        .map_err(io_err("flushing temp state file", path))?;
    file.sync_all()
        .await
        .map_err(io_err("syncing temp state file", path))
}

/// Snapshot stored at `<bucket_dir>/<key>` on a local or mounted filesystem.
#[derive(Debug, Clone)]
pub struct FileStateRepository {
    bucket_dir: PathBuf,
    key: String,
}

impl FileStateRepository {
    pub fn new(bucket_dir: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            bucket_dir: bucket_dir.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.bucket_dir.join(self.key.trim_start_matches('/'))
    }
}

#[async_trait]
impl StateRepository for FileStateRepository {
    async fn get(&self) -> Result<Option<State>, StateError> {
        let path = self.path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state document yet");
                return Ok(None);
            }
            Err(err) => return Err(io_err("reading state", &path)(err)),
        };
        State::from_json_bytes(&bytes)
            .map(Some)
            .map_err(|source| StateError::Decode {
                location: self.location(),
                source,
            })
    }

    /// Write to a temp file next to the target, then atomically rename over it.
    async fn put(&self, state: &State) -> Result<(), StateError> {
        let bytes = state.to_json_bytes().map_err(StateError::Encode)?;
        let path = self.path();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.bucket_dir.clone());

        fs::create_dir_all(&parent)
            .await
            .map_err(io_err("creating state directory", &parent))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err("opening temp state file", &temp_path))?;
        let written = write_synced(&mut file, &temp_path, &bytes).await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_err("renaming temp state file onto", &path)(err));
        }

        info!(path = %path.display(), bytes = bytes.len(), "state document written");
        Ok(())
    }

    fn location(&self) -> String {
        self.path().display().to_string()
    }
}

/// Snapshot stored in an HTTP object store addressed as `{endpoint}/{bucket}/{key}`
/// (Google Cloud Storage XML API and compatible gateways).
#[derive(Debug, Clone)]
pub struct HttpObjectStateRepository {
    http: Arc<HttpFetcher>,
    endpoint: String,
    bucket: String,
    key: String,
    token: Option<String>,
}

impl HttpObjectStateRepository {
    pub fn new(
        http: Arc<HttpFetcher>,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            key: key.into().trim_start_matches('/').to_string(),
            token,
        }
    }

    pub fn object_url(&self) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, self.key)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl StateRepository for HttpObjectStateRepository {
    async fn get(&self) -> Result<Option<State>, StateError> {
        let url = self.object_url();
        let resp = match self
            .http
            .execute("state_get", |client| self.authorize(client.get(&url)))
            .await
        {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => {
                debug!(%url, "no state object yet");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        State::from_json_bytes(&resp.body)
            .map(Some)
            .map_err(|source| StateError::Decode {
                location: url,
                source,
            })
    }

    async fn put(&self, state: &State) -> Result<(), StateError> {
        let bytes = state.to_json_bytes().map_err(StateError::Encode)?;
        let url = self.object_url();
        self.http
            .execute("state_put", |client| {
                self.authorize(
                    client
                        .put(&url)
                        .header(CONTENT_TYPE, "application/json")
                        .body(bytes.clone()),
                )
            })
            .await?;
        info!(%url, bytes = bytes.len(), "state object written");
        Ok(())
    }

    fn location(&self) -> String {
        self.object_url()
    }
}
