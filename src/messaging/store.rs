/// Append-only message log persistence.
///
/// A replica's log is index-addressable: entry `i` never changes once
/// written. Peers read each other's logs by index, which is what makes the
/// per-host replication cursor in [`Chat`](crate::messaging::Chat) work.
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::messaging::limits::MAX_FRAME_BYTES;
use crate::messaging::message::SignedMessage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Index {index} out of range for log of {len} entries")]
    IndexOutOfRange { index: u64, len: u64 },

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Corrupt log: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Persistence backend for one replica's log.
///
/// Implementations must be append-only: `add_message` never overwrites, and
/// a successful `add_message` is visible to every later read.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Number of entries in the log.
    async fn len(&self) -> Result<u64, StoreError>;

    /// Every entry at or after `index`. Fails if `index > len`.
    async fn get_messages_from(&self, index: u64) -> Result<Vec<SignedMessage>, StoreError>;

    /// Entries in `[from, to)`. Fails if `from > to` or `to > len`.
    async fn get_messages(&self, from: u64, to: u64) -> Result<Vec<SignedMessage>, StoreError>;

    /// Append one entry.
    async fn add_message(&self, message: &SignedMessage) -> Result<(), StoreError>;
}

/// Shared range check for `Vec`-backed logs.
fn slice_range(log: &[SignedMessage], from: u64, to: u64) -> Result<Vec<SignedMessage>, StoreError> {
    let len = log.len() as u64;
    if to > len {
        return Err(StoreError::IndexOutOfRange { index: to, len });
    }
    if from > to {
        return Err(StoreError::IndexOutOfRange { index: from, len: to });
    }
    Ok(log[from as usize..to as usize].to_vec())
}

// ---------------------------------------------------------------------------
// MemoryMessageStore
// ---------------------------------------------------------------------------

/// In-memory log. Used by tests and by replicas that persist elsewhere.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<SignedMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every entry of `other`, in order. Seeds an invitee's log with
    /// the inviter's history before the invitee's first Join.
    pub async fn mirror(&self, other: &MemoryMessageStore) {
        // Snapshot first so mirroring a store into itself cannot deadlock.
        let entries = other.snapshot().await;
        self.messages.lock().await.extend(entries);
    }

    /// Copy of the whole log.
    pub async fn snapshot(&self) -> Vec<SignedMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn get(&self, index: u64) -> Option<SignedMessage> {
        self.messages.lock().await.get(index as usize).cloned()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn len(&self) -> Result<u64, StoreError> {
        Ok(self.messages.lock().await.len() as u64)
    }

    async fn get_messages_from(&self, index: u64) -> Result<Vec<SignedMessage>, StoreError> {
        let log = self.messages.lock().await;
        slice_range(&log, index, log.len() as u64)
    }

    async fn get_messages(&self, from: u64, to: u64) -> Result<Vec<SignedMessage>, StoreError> {
        let log = self.messages.lock().await;
        slice_range(&log, from, to)
    }

    async fn add_message(&self, message: &SignedMessage) -> Result<(), StoreError> {
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

/// Encode one entry as `[4-byte BE len][CBOR bytes]`.
pub fn encode_frame(message: &SignedMessage) -> Result<Vec<u8>, StoreError> {
    let bytes = message
        .to_bytes()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(StoreError::Corrupt(format!(
            "Entry is {} bytes, exceeds max of {}",
            bytes.len(),
            MAX_FRAME_BYTES
        )));
    }
    let mut frame = Vec::with_capacity(4 + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    frame.extend_from_slice(&bytes);
    Ok(frame)
}

/// Decode concatenated frames, enforcing the per-frame size cap.
pub fn decode_frames(data: &[u8]) -> Result<Vec<SignedMessage>, StoreError> {
    let (messages, valid_len) = decode_log(data)?;
    if valid_len < data.len() {
        return Err(StoreError::Corrupt(format!(
            "Truncated frame at offset {} ({} trailing bytes)",
            valid_len,
            data.len() - valid_len
        )));
    }
    Ok(messages)
}

/// Decode the complete frames at the front of `data`.
///
/// Returns the entries and the byte length they span. An incomplete last
/// frame (a torn append) ends the log; any bytes after `valid_len` belong to
/// it. Oversized or undecodable complete frames are `Corrupt`.
pub fn decode_log(data: &[u8]) -> Result<(Vec<SignedMessage>, usize), StoreError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let header: [u8; 4] = match data.get(offset..offset + 4).and_then(|b| b.try_into().ok()) {
            Some(header) => header,
            None => break,
        };
        let len = u32::from_be_bytes(header) as usize;
        let body = offset + 4;

        if len > MAX_FRAME_BYTES {
            return Err(StoreError::Corrupt(format!(
                "Frame at offset {} is {} bytes, exceeds max of {}",
                body, len, MAX_FRAME_BYTES
            )));
        }
        if body + len > data.len() {
            break;
        }

        let message = SignedMessage::from_bytes(&data[body..body + len])
            .map_err(|e| StoreError::Corrupt(format!("Frame decode at offset {}: {}", body, e)))?;
        messages.push(message);
        offset = body + len;
    }

    Ok((messages, offset))
}

// ---------------------------------------------------------------------------
// FileMessageStore
// ---------------------------------------------------------------------------

#[cfg(feature = "file-store")]
pub use file::FileMessageStore;

#[cfg(feature = "file-store")]
mod file {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use tokio::fs::{self, File, OpenOptions};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Mutex;

    use super::{decode_log, encode_frame, slice_range, MessageStore, StoreError};
    use crate::messaging::message::SignedMessage;

    struct FileLog {
        file: File,
        /// File length covered by `cache`. Bytes past it are a failed append.
        committed_len: u64,
        cache: Vec<SignedMessage>,
    }

    /// Single-file append log of length-prefixed CBOR frames.
    ///
    /// The whole log is cached in memory on open; reads never touch disk.
    /// An append that fails part way is cut back off the file, so an entry
    /// is on disk exactly when it is in the cache.
    pub struct FileMessageStore {
        path: PathBuf,
        inner: Mutex<FileLog>,
    }

    impl FileMessageStore {
        /// Open (or create) the log at `path` and load existing entries.
        ///
        /// A torn frame at the end of the file is truncated away.
        pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
            let path = path.as_ref().to_path_buf();
            let (cache, valid_len, file_len) = match fs::read(&path).await {
                Ok(data) => {
                    let (cache, valid_len) = decode_log(&data)?;
                    (cache, valid_len as u64, data.len() as u64)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), 0, 0),
                Err(e) => return Err(e.into()),
            };
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            if file_len > valid_len {
                log::warn!(
                    "Dropping {} bytes of torn frame from {}",
                    file_len - valid_len,
                    path.display()
                );
                file.set_len(valid_len).await?;
                file.sync_data().await?;
            }
            log::debug!("Opened message log {} with {} entries", path.display(), cache.len());
            Ok(FileMessageStore {
                path,
                inner: Mutex::new(FileLog {
                    file,
                    committed_len: valid_len,
                    cache,
                }),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    async fn append_frame(file: &mut File, frame: &[u8]) -> std::io::Result<()> {
        file.write_all(frame).await?;
        file.flush().await?;
        file.sync_data().await
    }

    #[async_trait]
    impl MessageStore for FileMessageStore {
        async fn len(&self) -> Result<u64, StoreError> {
            Ok(self.inner.lock().await.cache.len() as u64)
        }

        async fn get_messages_from(&self, index: u64) -> Result<Vec<SignedMessage>, StoreError> {
            let inner = self.inner.lock().await;
            slice_range(&inner.cache, index, inner.cache.len() as u64)
        }

        async fn get_messages(&self, from: u64, to: u64) -> Result<Vec<SignedMessage>, StoreError> {
            let inner = self.inner.lock().await;
            slice_range(&inner.cache, from, to)
        }

        async fn add_message(&self, message: &SignedMessage) -> Result<(), StoreError> {
            let frame = encode_frame(message)?;
            let mut inner = self.inner.lock().await;
            let committed = inner.committed_len;

            // Leftovers of an earlier failed append whose rollback also failed.
            if inner.file.metadata().await?.len() != committed {
                inner.file.set_len(committed).await?;
            }

            if let Err(e) = append_frame(&mut inner.file, &frame).await {
                log::warn!("Append to {} failed, rolling back: {}", self.path.display(), e);
                if let Err(rollback) = inner.file.set_len(committed).await {
                    log::error!("Rollback of {} failed: {}", self.path.display(), rollback);
                }
                return Err(e.into());
            }

            inner.committed_len = committed + frame.len() as u64;
            inner.cache.push(message.clone());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
