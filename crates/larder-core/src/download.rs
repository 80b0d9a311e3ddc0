//! Bottle acquisition.
//!
//! Downloads stream once and feed three consumers at the same time: the
//! local cache file, a SHA-256 digest, and the decompress/extract pipeline.
//! Nothing buffers the whole artifact in memory; the extractor runs as its
//! own task fed through a bounded channel. Integrity comes from a checksum
//! sidecar published beside the artifact (`<url>.sha256sum`); a mismatch
//! evicts the cached copy so a retry starts clean.
//!
//! Cache layout: one subdirectory per distinct source URL (keyed by a hash
//! of scheme, host, path, and query) containing the payload, the cached
//! sidecar, and a modification-time marker used for conditional re-fetching.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use larder_schema::Package;

use crate::paths::filename_from_url;
use crate::registry::Stowage;
use crate::reporter::Reporter;

/// Marker file recording when a cache slot was last fetched.
const FETCHED_MARKER: &str = ".fetched";

/// Errors produced while acquiring a bottle.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport-level failure.
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem or extraction failure.
    #[error("I/O error during download: {0}")]
    Io(#[from] std::io::Error),

    /// The bottle URL did not parse.
    #[error("invalid download URL '{url}'")]
    BadUrl {
        /// The offending URL.
        url: String,
    },

    /// The computed digest does not match the published sidecar. Fatal: the
    /// corrupt cache entry has already been evicted and the error is
    /// surfaced rather than retried, to avoid masking a compromised mirror.
    #[error("checksum mismatch for {url}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// The artifact URL.
        url: String,
        /// The digest the sidecar declared.
        expected: String,
        /// The digest computed from the downloaded bytes.
        actual: String,
    },

    /// The checksum sidecar could not be fetched or did not contain a
    /// digest. Installs never proceed unverified.
    #[error("checksum sidecar unavailable for {url}: {reason}")]
    ChecksumUnavailable {
        /// The artifact URL.
        url: String,
        /// Why the sidecar was unusable.
        reason: String,
    },
}

/// Streams bottles out of the cache or off the network, verifying and
/// extracting as the bytes arrive.
#[derive(Debug)]
pub struct Fetcher<'a> {
    client: &'a reqwest::Client,
    cache_dir: &'a Path,
}

impl<'a> Fetcher<'a> {
    /// A fetcher writing through the given cache directory.
    pub fn new(client: &'a reqwest::Client, cache_dir: &'a Path) -> Self {
        Self { client, cache_dir }
    }

    /// Acquire the bottle described by `stowage` and unpack it into `dest`,
    /// returning the artifact's verified SHA-256 digest (lowercase hex).
    ///
    /// A previously cached copy of the bottle is reused without touching the
    /// network (it is still digested and verified). `dest` should be a
    /// private directory: on any error its contents are unspecified and the
    /// caller is expected to discard it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ChecksumMismatch`] after evicting a corrupt
    /// cache entry, [`DownloadError::ChecksumUnavailable`] when the sidecar
    /// cannot be obtained, or any transport/filesystem error.
    pub async fn fetch_and_extract(
        &self,
        stowage: &Stowage,
        dest: &Path,
        pkg: &Package,
        reporter: &dyn Reporter,
    ) -> Result<String, DownloadError> {
        let parsed = url::Url::parse(&stowage.url).map_err(|_| DownloadError::BadUrl {
            url: stowage.url.clone(),
        })?;
        let slot = self.cache_dir.join(cache_key(&parsed));
        std::fs::create_dir_all(&slot)?;

        let basename = filename_from_url(&stowage.url).to_string();
        let artifact = slot.join(&basename);

        // The extractor consumes the same bytes the cache writer and the
        // hasher see, through a bounded channel; no stage buffers the whole
        // artifact.
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);
        let reader = StreamReader::new(ReceiverStream::new(rx));
        let xz = stowage.url.ends_with(".tar.xz") || stowage.url.ends_with(".txz");
        let unpack_into = dest.to_path_buf();
        let extractor = tokio::spawn(async move {
            if xz {
                let decoder = async_compression::tokio::bufread::XzDecoder::new(reader);
                let mut archive = tokio_tar::Archive::new(decoder);
                archive.unpack(&unpack_into).await
            } else {
                let decoder = async_compression::tokio::bufread::GzipDecoder::new(reader);
                let mut archive = tokio_tar::Archive::new(decoder);
                archive.unpack(&unpack_into).await
            }
        });

        let streamed = if artifact.is_file() {
            debug!(url = %stowage.url, "bottle cache hit");
            replay_cached(&artifact, &tx).await
        } else {
            self.stream_network(&stowage.url, &slot, &basename, &tx, pkg, reporter)
                .await
        };
        drop(tx);

        let digest = match streamed {
            Ok(digest) => digest,
            Err(e) => {
                extractor.abort();
                return Err(e);
            }
        };

        let expected = match self.expected_checksum(&stowage.url, &slot, &basename).await {
            Ok(expected) => expected,
            Err(e) => {
                extractor.abort();
                return Err(e);
            }
        };

        if !digest.eq_ignore_ascii_case(&expected) {
            extractor.abort();
            evict(&slot, &basename);
            return Err(DownloadError::ChecksumMismatch {
                url: stowage.url.clone(),
                expected,
                actual: digest,
            });
        }

        match extractor.await {
            Ok(Ok(())) => Ok(digest),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(std::io::Error::other(e).into()),
        }
    }

    /// GET the artifact, fanning each chunk out to the cache file, the
    /// digest, and the extraction channel.
    async fn stream_network(
        &self,
        url: &str,
        slot: &Path,
        basename: &str,
        tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
        pkg: &Package,
        reporter: &dyn Reporter,
    ) -> Result<String, DownloadError> {
        debug!(url, "downloading bottle");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length();

        // Written under a .partial name and renamed only when complete, so
        // a crashed download never poses as a cached artifact.
        let partial = slot.join(format!("{basename}.partial"));
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            reporter.downloading(pkg, downloaded, total);
            if tx.send(Ok(chunk)).await.is_err() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "extractor terminated early",
                )
                .into());
            }
        }
        file.flush().await?;

        std::fs::rename(&partial, slot.join(basename))?;
        std::fs::write(slot.join(FETCHED_MARKER), b"")?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Obtain the expected digest from the `<url>.sha256sum` sidecar,
    /// preferring a cached copy.
    async fn expected_checksum(
        &self,
        url: &str,
        slot: &Path,
        basename: &str,
    ) -> Result<String, DownloadError> {
        let unavailable = |reason: String| DownloadError::ChecksumUnavailable {
            url: url.to_string(),
            reason,
        };

        let cached_sidecar = slot.join(format!("{basename}.sha256sum"));
        let text = if cached_sidecar.is_file() {
            std::fs::read_to_string(&cached_sidecar)?
        } else {
            let sidecar_url = format!("{url}.sha256sum");
            trace!(sidecar_url, "fetching checksum sidecar");
            let text = self
                .client
                .get(&sidecar_url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| unavailable(e.to_string()))?
                .text()
                .await
                .map_err(|e| unavailable(e.to_string()))?;
            std::fs::write(&cached_sidecar, &text)?;
            text
        };

        // Sidecar format: "<hex-digest>  <basename>"; tolerate case and
        // surrounding whitespace.
        text.split_whitespace()
            .next()
            .filter(|token| token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()))
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| unavailable("sidecar contains no digest".to_string()))
    }
}

/// Feed a cached artifact through the hasher and the extraction channel.
async fn replay_cached(
    artifact: &Path,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
) -> Result<String, DownloadError> {
    let mut file = tokio::fs::File::open(artifact).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        if tx
            .send(Ok(Bytes::copy_from_slice(&buf[..n])))
            .await
            .is_err()
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "extractor terminated early",
            )
            .into());
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Remove a corrupt cache entry (payload, sidecar, and marker).
fn evict(slot: &Path, basename: &str) {
    let _ = std::fs::remove_file(slot.join(basename));
    let _ = std::fs::remove_file(slot.join(format!("{basename}.sha256sum")));
    let _ = std::fs::remove_file(slot.join(FETCHED_MARKER));
}

/// Cache slot name for a URL: a digest over scheme, host, path, and query.
fn cache_key(url: &url::Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.scheme().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.host_str().unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.path().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.query().unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Hoist the contents of up to `count` levels of single-directory nesting.
///
/// Bottles conventionally wrap their payload in `<project>-<version>/`;
/// after extraction the installer strips those leading components so the
/// store directory holds `bin/`, `lib/`, etc. directly. Hidden files (e.g.
/// `.DS_Store`) do not prevent stripping. Stops early if a level is not a
/// single directory.
///
/// # Errors
///
/// Returns any I/O error from the directory shuffle.
pub fn strip_components(dir: &Path, count: usize) -> std::io::Result<()> {
    for _ in 0..count {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(Result::ok).collect();
        entries.retain(|e| !e.file_name().to_string_lossy().starts_with('.'));

        if entries.len() != 1 || !entries[0].file_type()?.is_dir() {
            break;
        }
        let top_level = entries[0].path();
        for entry in std::fs::read_dir(&top_level)?.filter_map(Result::ok) {
            std::fs::rename(entry.path(), dir.join(entry.file_name()))?;
        }
        std::fs::remove_dir(&top_level)?;
    }
    Ok(())
}

/// The cache slot directory a stowage's payload would occupy. Exposed for
/// the installer's eviction-on-retry path and for tests.
pub fn cache_slot(cache_dir: &Path, stowage: &Stowage) -> Option<PathBuf> {
    let parsed = url::Url::parse(&stowage.url).ok()?;
    Some(cache_dir.join(cache_key(&parsed)))
}
