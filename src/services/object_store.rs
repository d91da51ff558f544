//! src/services/object_store.rs
//!
//! ObjectStore — encrypted, content-hashed payload storage on local disk.
//! Objects live under `base_path/{yyyy}/{mm}/{dd}/{hash8}_{name}`; the path
//! relative to `base_path` is the handle recorded in metadata. This module
//! knows nothing about owners or tickets.

use crate::services::cipher::{CipherCodec, DecryptingReader};
use bytes::Bytes;
use chrono::{Datelike, Utc};
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

const READ_CHUNK: usize = 64 * 1024;
const MAX_HANDLE_LEN: usize = 1024;
const MAX_FILENAME_LEN: usize = 120;
const HASH_PREFIX_LEN: usize = 8;
/// Upper bound on `{hash8}_{n}_{name}` candidates tried for one upload.
const MAX_NAME_CANDIDATES: usize = 1000;
/// Scratch directory for spooled uploads, relative to `base_path`.
const SPOOL_DIR: &str = ".spool";

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("stored object `{0}` not found")]
    NotFound(String),
    #[error("invalid storage handle")]
    InvalidHandle,
    #[error("upload exceeds the {limit} byte limit")]
    LimitExceeded { limit: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Reader returned by [`ObjectStore::get`]; dropping it closes the file.
pub type ObjectReader = DecryptingReader<File>;

/// Outcome of a successful [`ObjectStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Path relative to the store root, `/`-separated.
    pub handle: String,
    /// Lowercase hex SHA-256 of the plaintext.
    pub content_hash: String,
    /// Plaintext length.
    pub size_bytes: u64,
}

/// A forward-only upload buffered to a scratch file so it can be read twice.
///
/// The scratch file is removed when this value is dropped.
pub struct SpooledUpload {
    file: File,
    size: u64,
    _scratch: tempfile::TempPath,
}

impl SpooledUpload {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

#[derive(Clone, Debug)]
pub struct ObjectStore {
    /// Root directory for object payloads.
    pub base_path: PathBuf,
    codec: CipherCodec,
}

impl ObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, codec: CipherCodec) -> Self {
        Self {
            base_path: base_path.into(),
            codec,
        }
    }

    /// Hash, encrypt and persist `source`.
    ///
    /// The source is read twice (digest pass, then encrypt pass) and is
    /// rewound to the position it had on entry between the passes.
    pub async fn put<R>(&self, source: &mut R, declared_filename: &str) -> ObjectStoreResult<StoredObject>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let start = source.stream_position().await?;
        let (content_hash, size_bytes) = digest_source(source).await?;
        source.seek(SeekFrom::Start(start)).await?;

        let now = Utc::now();
        let rel_dir = format!("{:04}/{:02}/{:02}", now.year(), now.month(), now.day());
        let dir = self.base_path.join(&rel_dir);
        // Concurrent uploads on the same day race here; create_dir_all tolerates that.
        fs::create_dir_all(&dir).await?;

        let name = sanitize_filename(declared_filename);
        let (file_name, file) = claim_name(&dir, &content_hash[..HASH_PREFIX_LEN], &name).await?;
        // Removes the claimed file on every exit short of success, including
        // this future being dropped mid-write.
        let partial = PartialObject::new(dir.join(&file_name));

        let written = self.write_encrypted(source, file).await?;
        if written != size_bytes {
            return Err(ObjectStoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!("upload source changed between passes ({size_bytes} then {written} bytes)"),
            )));
        }
        partial.keep();

        let handle = format!("{}/{}", rel_dir, file_name);
        debug!(%handle, size_bytes, "stored object");
        Ok(StoredObject {
            handle,
            content_hash,
            size_bytes,
        })
    }

    /// Open a stored object for reading plaintext.
    pub async fn get(&self, handle: &str) -> ObjectStoreResult<ObjectReader> {
        let path = self.object_path(handle)?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(handle.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        Ok(self.codec.open_decrypting_source(file).await?)
    }

    /// Remove a stored object.
    pub async fn delete(&self, handle: &str) -> ObjectStoreResult<()> {
        let path = self.object_path(handle)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed physical file {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(handle.to_string()))
            }
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    /// Buffer a forward-only byte stream into a scratch file, failing as soon
    /// as more than `max_bytes` arrive.
    pub async fn spool<S>(&self, stream: S, max_bytes: u64) -> ObjectStoreResult<SpooledUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let spool_dir = self.base_path.join(SPOOL_DIR);
        fs::create_dir_all(&spool_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&spool_dir)?
            .into_temp_path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&scratch)
            .await?;

        let mut size: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size += chunk.len() as u64;
            if size > max_bytes {
                return Err(ObjectStoreError::LimitExceeded { limit: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.rewind().await?;

        Ok(SpooledUpload {
            file,
            size,
            _scratch: scratch,
        })
    }

    /// Encrypt the remainder of `source` into `file`, fsync, and return the
    /// plaintext byte count.
    async fn write_encrypted<R>(&self, source: &mut R, file: File) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut sink = self.codec.open_encrypting_sink(file).await?;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut written: u64 = 0;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await?;
            written += n as u64;
        }
        let file = sink.finish().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Resolve a handle beneath `base_path`, rejecting anything that could
    /// escape it.
    fn object_path(&self, handle: &str) -> ObjectStoreResult<PathBuf> {
        ensure_handle_safe(handle)?;
        Ok(self.base_path.join(handle))
    }
}

/// A claimed object path that is deleted on drop unless kept.
struct PartialObject {
    path: PathBuf,
    keep: bool,
}

impl PartialObject {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialObject {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        // Drop cannot await; a single unlink is cheap enough to do inline.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed partial object {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove partial object {}: {}", self.path.display(), err),
        }
    }
}

/// Read `source` to the end, returning the hex SHA-256 and byte count.
async fn digest_source<R>(source: &mut R) -> io::Result<(String, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut size: u64 = 0;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// Create the first free file name for this object with create-new
/// semantics: `{prefix}_{name}`, then `{prefix}_{n}_{name}`.
async fn claim_name(dir: &Path, prefix: &str, name: &str) -> io::Result<(String, File)> {
    for attempt in 0..MAX_NAME_CANDIDATES {
        let candidate = if attempt == 0 {
            format!("{}_{}", prefix, name)
        } else {
            format!("{}_{}_{}", prefix, attempt, name)
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&candidate))
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free object name for {}_{} in {}", prefix, name, dir.display()),
    ))
}

/// Reduce a client-supplied filename to a safe single path component.
pub fn sanitize_filename(declared: &str) -> String {
    let base = declared.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    let mut name: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    if name.is_empty() {
        name.push_str("file");
    }
    name
}

/// Rejects handles that are empty, absolute, or could traverse out of the
/// store root.
fn ensure_handle_safe(handle: &str) -> ObjectStoreResult<()> {
    if handle.is_empty() || handle.len() > MAX_HANDLE_LEN {
        return Err(ObjectStoreError::InvalidHandle);
    }
    if handle.starts_with('/') || handle.split('/').any(|part| part.is_empty() || part == "..") {
        return Err(ObjectStoreError::InvalidHandle);
    }
    if handle.bytes().any(|b| b.is_ascii_control() || b == b'\\' || b == b':') {
        return Err(ObjectStoreError::InvalidHandle);
    }
    Ok(())
}
