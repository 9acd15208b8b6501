//! Local Cache
//!
//! Participant-side durable slots:
//! - one pending reservation per canvas, written before the fill request
//!   and cleared once the store answers definitively
//! - the last minted artifact, for immediate display before the ledger
//!   confirms
//!
//! # File format
//!
//! `FileCache` stores bincode: version (u32) and the contents, followed by
//! a SHA-256 checksum of that body. A missing, corrupt or foreign-version
//! file reads as empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::canvas::tile::{CanvasId, ImageRef};
use crate::core::hash::hash_bytes;

/// Current cache format version.
const CACHE_VERSION: u32 = 1;

/// Cache file name.
pub const CACHE_FILENAME: &str = "taz_session.bin";

/// A fill request whose response may have been lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReservation {
    /// Target canvas.
    pub canvas_id: CanvasId,
    /// Target tile.
    pub tile_index: usize,
    /// Submitted drawing.
    pub image: ImageRef,
    /// Hex digest of the bundle sent.
    pub proof_digest: String,
    /// When it was written.
    pub created_at: DateTime<Utc>,
}

/// A minted canvas, as first seen by this participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintedArtifact {
    /// Minted canvas.
    pub canvas_id: CanvasId,
    /// Artifact content id.
    pub image_id: String,
    /// Artifact location.
    pub artifact_uri: String,
    /// Flattened image submitted for minting.
    pub flattened: ImageRef,
    /// When it was cached.
    pub cached_at: DateTime<Utc>,
}

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding failure.
    #[error("cache encoding failed: {0}")]
    Encode(#[from] bincode::Error),
}

/// Durable participant-side slots.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Write the pending slot for a canvas.
    async fn put_pending(&self, pending: PendingReservation) -> Result<(), CacheError>;

    /// Read the pending slot for a canvas.
    async fn pending(&self, canvas_id: CanvasId) -> Result<Option<PendingReservation>, CacheError>;

    /// Clear the pending slot for a canvas.
    async fn clear_pending(&self, canvas_id: CanvasId) -> Result<(), CacheError>;

    /// Replace the last-minted slot.
    async fn put_minted(&self, artifact: MintedArtifact) -> Result<(), CacheError>;

    /// Read the last-minted slot.
    async fn last_minted(&self) -> Result<Option<MintedArtifact>, CacheError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheContents {
    pending: BTreeMap<CanvasId, PendingReservation>,
    last_minted: Option<MintedArtifact>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    contents: CacheContents,
}

// =============================================================================
// Memory
// =============================================================================

/// In-memory cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    contents: RwLock<CacheContents>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn put_pending(&self, pending: PendingReservation) -> Result<(), CacheError> {
        self.contents.write().await.pending.insert(pending.canvas_id, pending);
        Ok(())
    }

    async fn pending(&self, canvas_id: CanvasId) -> Result<Option<PendingReservation>, CacheError> {
        Ok(self.contents.read().await.pending.get(&canvas_id).cloned())
    }

    async fn clear_pending(&self, canvas_id: CanvasId) -> Result<(), CacheError> {
        self.contents.write().await.pending.remove(&canvas_id);
        Ok(())
    }

    async fn put_minted(&self, artifact: MintedArtifact) -> Result<(), CacheError> {
        self.contents.write().await.last_minted = Some(artifact);
        Ok(())
    }

    async fn last_minted(&self) -> Result<Option<MintedArtifact>, CacheError> {
        Ok(self.contents.read().await.last_minted.clone())
    }
}

// =============================================================================
// File
// =============================================================================

/// Single-file bincode cache.
pub struct FileCache {
    path: PathBuf,
    // Serializes read-modify-write.
    lock: Mutex<()>,
}

impl FileCache {
    /// Cache stored as `CACHE_FILENAME` under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::at(dir.join(CACHE_FILENAME))
    }

    /// Cache stored at `path`.
    pub fn at(path: PathBuf) -> Self {
        Self { path, lock: Mutex::new(()) }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CacheContents {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, path = %self.path.display(), "Failed to read session cache");
                }
                return CacheContents::default();
            }
        };

        if bytes.len() < 32 {
            warn!("Session cache file too small");
            return CacheContents::default();
        }

        let (body, checksum) = bytes.split_at(bytes.len() - 32);
        if hash_bytes(body).as_slice() != checksum {
            warn!("Session cache checksum mismatch - ignoring");
            return CacheContents::default();
        }

        match bincode::deserialize::<CacheFile>(body) {
            Ok(file) if file.version == CACHE_VERSION => file.contents,
            Ok(file) => {
                debug!(version = file.version, "Session cache version mismatch");
                CacheContents::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to decode session cache");
                CacheContents::default()
            }
        }
    }

    async fn store(&self, contents: CacheContents) -> Result<(), CacheError> {
        let mut bytes = bincode::serialize(&CacheFile { version: CACHE_VERSION, contents })?;
        let checksum = hash_bytes(&bytes);
        bytes.extend_from_slice(&checksum);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update<F>(&self, f: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut CacheContents) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut contents = self.load().await;
        f(&mut contents);
        self.store(contents).await
    }
}

#[async_trait]
impl LocalCache for FileCache {
    async fn put_pending(&self, pending: PendingReservation) -> Result<(), CacheError> {
        self.update(|c| {
            c.pending.insert(pending.canvas_id, pending);
        })
        .await
    }

    async fn pending(&self, canvas_id: CanvasId) -> Result<Option<PendingReservation>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await.pending.remove(&canvas_id))
    }

    async fn clear_pending(&self, canvas_id: CanvasId) -> Result<(), CacheError> {
        self.update(|c| {
            c.pending.remove(&canvas_id);
        })
        .await
    }

    async fn put_minted(&self, artifact: MintedArtifact) -> Result<(), CacheError> {
        self.update(|c| c.last_minted = Some(artifact)).await
    }

    async fn last_minted(&self) -> Result<Option<MintedArtifact>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await.last_minted)
    }
}
