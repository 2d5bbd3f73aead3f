use crate::error::FetchError;
use crate::stream::{bounded_chunks, CHUNK_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use hyper::header::USER_AGENT;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Extensions probed when looking a track up by video id.
const ID_EXTENSIONS: [&str; 3] = ["mp3", "m4a", "webm"];

pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Produces the body of a track on a cache miss.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<ByteStream, FetchError>;
}

/// Downloads a URL with a plain GET.
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self) -> Result<ByteStream, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response.bytes_stream().map_err(FetchError::from).boxed())
    }
}

/// How a track is named on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// `<sanitized title>.mp3`, exact match.
    Title(String),
    /// `<id>.<ext>`; lookup accepts any of mp3/m4a/webm, new downloads use
    /// `format` (mp3 when unknown).
    VideoId { id: String, format: Option<String> },
}

impl CacheKey {
    pub fn title(title: impl Into<String>) -> Self {
        Self::Title(title.into())
    }

    pub fn video(id: impl Into<String>, format: Option<String>) -> Self {
        Self::VideoId {
            id: id.into(),
            format,
        }
    }
}

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("invalid non-word regex"));
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").expect("invalid separator regex"));

/// Drops everything outside the Unicode `\w`, `\s` and `-` classes, trims,
/// then collapses each run of hyphens and whitespace into one underscore.
/// `\w` includes combining marks, so scripts such as Devanagari keep their
/// vowel signs and viramas.
pub fn sanitize_filename(input: &str) -> String {
    let kept = NON_WORD.replace_all(input, "");
    SEPARATORS.replace_all(kept.trim(), "_").into_owned()
}

/// Download directory where the filesystem is the only index.
pub struct LocalFileCache {
    cache_dir: PathBuf,
    seq: AtomicU64,
}

impl LocalFileCache {
    pub async fn new(cache_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).await?;
        Ok(Self {
            cache_dir,
            seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns an existing file for `key`, checked on storage right now.
    pub async fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        match key {
            CacheKey::Title(title) => {
                let name = sanitize_filename(title);
                if name.is_empty() {
                    return None;
                }
                existing(self.cache_dir.join(format!("{name}.mp3"))).await
            }
            CacheKey::VideoId { id, .. } => {
                let id = safe_id(id)?;
                for ext in ID_EXTENSIONS {
                    if let Some(path) = existing(self.cache_dir.join(format!("{id}.{ext}"))).await {
                        return Some(path);
                    }
                }
                None
            }
        }
    }

    fn target_path(&self, key: &CacheKey) -> Result<PathBuf, FetchError> {
        let file_name = match key {
            CacheKey::Title(title) => {
                let name = sanitize_filename(title);
                if name.is_empty() {
                    return Err(FetchError::InvalidName(title.clone()));
                }
                format!("{name}.mp3")
            }
            CacheKey::VideoId { id, format } => {
                let name = safe_id(id).ok_or_else(|| FetchError::InvalidName(id.clone()))?;
                let ext = format
                    .as_deref()
                    .map(str::to_lowercase)
                    .filter(|f| safe_id(f).is_some())
                    .unwrap_or_else(|| "mp3".to_string());
                format!("{name}.{ext}")
            }
        };
        Ok(self.cache_dir.join(file_name))
    }

    /// Serves `key` from disk, or downloads it through `fetcher`.
    ///
    /// The body is written to a private temporary file and only renamed onto
    /// the target once complete, so an aborted download never leaves a file
    /// that a later lookup would take for a cached track.
    pub async fn get_or_fetch(&self, key: &CacheKey, fetcher: &dyn Fetcher) -> Result<PathBuf, FetchError> {
        if let Some(path) = self.lookup(key).await {
            debug!(path = %path.display(), "file already cached");
            return Ok(path);
        }

        let target = self.target_path(key)?;
        let stream = fetcher.fetch().await?;
        let tmp = self.temp_path(&target);

        match write_stream(&tmp, stream).await {
            Ok(written) => {
                if let Err(e) = fs::rename(&tmp, &target).await {
                    discard(&tmp).await;
                    return Err(e.into());
                }
                info!(path = %target.display(), bytes = written, "downloaded track");
                Ok(target)
            }
            Err(e) => {
                discard(&tmp).await;
                warn!(path = %target.display(), error = %e, "download aborted");
                Err(e)
            }
        }
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.cache_dir
            .join(format!(".{name}.{}.{seq}.part", std::process::id()))
    }
}

/// Ids and extensions are used verbatim, so they may only hold characters
/// that cannot escape the cache directory.
fn safe_id(id: &str) -> Option<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}

async fn discard(tmp: &Path) {
    match fs::remove_file(tmp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %tmp.display(), error = %e, "failed to discard partial download"),
    }
}

async fn existing(path: PathBuf) -> Option<PathBuf> {
    match fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Some(path),
        _ => None,
    }
}

async fn write_stream(path: &Path, stream: ByteStream) -> Result<u64, FetchError> {
    let mut file = fs::File::create(path).await?;
    let mut chunks = Box::pin(bounded_chunks(stream, CHUNK_SIZE));
    let mut written = 0u64;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| match e.into_inner() {
            Some(inner) => match inner.downcast::<FetchError>() {
                Ok(fetch) => *fetch,
                Err(other) => FetchError::Network(other.to_string()),
            },
            None => FetchError::Network("download interrupted".into()),
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    if written == 0 {
        return Err(FetchError::EmptyBody);
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
