//! Canvas Store
//!
//! Server-side source of truth. Any number of readers may snapshot a
//! canvas concurrently; the check-then-write for a slot runs under that
//! canvas's own mutex so two writes to one index can never both land.
//!
//! ```text
//! reserve_and_fill(id, index, image, bundle)
//!     │
//!     ├── verify bundle (no lock held)
//!     │
//!     └── lock canvas ──┬── same bundle seen?  → recorded outcome / Replayed
//!                       ├── index out of range → TileOutOfRange
//!                       ├── slot filled        → Rejected(existing)
//!                       ├── nullifier used     → NullifierUsed
//!                       └── write              → Accepted(tiles, completed)
//!                                                   │
//!                                                   └── completed: allocate next
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::canvas::events::CanvasEvent;
use crate::canvas::mint::{MintError, MintReceipt, Minter};
use crate::canvas::state::{Canvas, CanvasPhase, CanvasSnapshot, FillOutcome};
use crate::canvas::tile::{CanvasId, ImageRef};
use crate::core::hash::short_hex;
use crate::proof::bundle::ProofBundle;
use crate::proof::verify::{MembershipVerifier, ProofError};

// =============================================================================
// Errors
// =============================================================================

/// Store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No canvas with this id.
    #[error("unknown canvas {0}")]
    UnknownCanvas(CanvasId),

    /// Tile index past the end of the canvas.
    #[error("tile {index} out of range (canvas has {len})")]
    TileOutOfRange {
        /// Requested index.
        index: usize,
        /// Slot count.
        len: usize,
    },

    /// Finalize requested before every slot was filled.
    #[error("canvas {0} is not complete")]
    NotComplete(CanvasId),

    /// Bundle refused.
    #[error("proof invalid: {0}")]
    Proof(#[from] ProofError),

    /// Ledger failed to mint.
    #[error("mint failed: {0}")]
    Mint(#[from] MintError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Slots in each newly allocated canvas.
    pub tile_count: usize,
    /// Allocate a fresh open canvas when the current one completes.
    pub allocate_on_complete: bool,
    /// Buffered events per feed subscriber.
    pub event_capacity: usize,
    /// Minted canvases kept addressable; older ones are dropped.
    pub retain_minted: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tile_count: crate::DEFAULT_TILE_COUNT,
            allocate_on_complete: true,
            event_capacity: 256,
            retain_minted: 64,
        }
    }
}

/// Result of a finalize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This call minted the canvas.
    Minted(MintReceipt),
    /// An earlier call already minted it.
    AlreadyFinalized(MintReceipt),
}

impl FinalizeOutcome {
    /// Receipt regardless of which call minted.
    pub fn receipt(&self) -> &MintReceipt {
        match self {
            FinalizeOutcome::Minted(r) | FinalizeOutcome::AlreadyFinalized(r) => r,
        }
    }
}

/// Store counters.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Open canvas receiving writes.
    pub current: Option<CanvasId>,
    /// Canvases held.
    pub canvases: usize,
    /// Complete but not minted.
    pub complete: usize,
    /// Minted.
    pub minted: usize,
}

// =============================================================================
// Store
// =============================================================================

/// Authoritative canvas state.
pub struct CanvasStore {
    config: StoreConfig,
    canvases: RwLock<BTreeMap<CanvasId, Arc<Mutex<Canvas>>>>,
    current: RwLock<CanvasId>,
    verifier: Arc<dyn MembershipVerifier>,
    minter: Arc<dyn Minter>,
    events: broadcast::Sender<CanvasEvent>,
    /// Minted canvases, oldest first.
    minted_order: Mutex<VecDeque<CanvasId>>,
}

impl CanvasStore {
    /// Create a store with one open canvas.
    pub fn new(
        config: StoreConfig,
        verifier: Arc<dyn MembershipVerifier>,
        minter: Arc<dyn Minter>,
    ) -> Self {
        let first = Canvas::new(CanvasId::new_random(), config.tile_count);
        let first_id = first.id;
        let mut canvases = BTreeMap::new();
        canvases.insert(first_id, Arc::new(Mutex::new(first)));

        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            config,
            canvases: RwLock::new(canvases),
            current: RwLock::new(first_id),
            verifier,
            minter,
            events,
            minted_order: Mutex::new(VecDeque::new()),
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribe to store events.
    pub fn subscribe(&self) -> broadcast::Receiver<CanvasEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CanvasEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Allocate a new open canvas and make it current.
    pub async fn allocate_canvas(&self) -> CanvasId {
        let canvas = Canvas::new(CanvasId::new_random(), self.config.tile_count);
        let id = canvas.id;

        self.canvases.write().await.insert(id, Arc::new(Mutex::new(canvas)));
        *self.current.write().await = id;

        info!(canvas = %id, tiles = self.config.tile_count, "Allocated canvas");
        self.emit(CanvasEvent::CanvasAllocated {
            canvas_id: id,
            tile_count: self.config.tile_count,
        });
        id
    }

    /// Id of the open canvas.
    pub async fn current_id(&self) -> CanvasId {
        *self.current.read().await
    }

    /// Snapshot of the open canvas.
    pub async fn current(&self) -> Result<CanvasSnapshot, StoreError> {
        let id = self.current_id().await;
        self.snapshot(id).await
    }

    /// Snapshot of any canvas.
    pub async fn snapshot(&self, canvas_id: CanvasId) -> Result<CanvasSnapshot, StoreError> {
        let canvas = self.canvas(canvas_id).await?;
        let guard = canvas.lock().await;
        Ok(guard.snapshot())
    }

    /// Lifecycle phase of a canvas.
    pub async fn phase(&self, canvas_id: CanvasId) -> Result<CanvasPhase, StoreError> {
        let canvas = self.canvas(canvas_id).await?;
        let guard = canvas.lock().await;
        Ok(guard.phase())
    }

    async fn canvas(&self, canvas_id: CanvasId) -> Result<Arc<Mutex<Canvas>>, StoreError> {
        let canvases = self.canvases.read().await;
        canvases.get(&canvas_id).cloned().ok_or(StoreError::UnknownCanvas(canvas_id))
    }

    /// Compare-and-set a slot.
    ///
    /// Returns `Accepted` with the authoritative tiles after the write, or
    /// `Rejected` with the image that already holds the slot. The bundle
    /// is consumed by the attempt either way; resending the identical
    /// request returns the same answer.
    pub async fn reserve_and_fill(
        &self,
        canvas_id: CanvasId,
        tile_index: usize,
        image: ImageRef,
        bundle: &ProofBundle,
    ) -> Result<FillOutcome, StoreError> {
        let canvas = self.canvas(canvas_id).await?;

        if let Err(e) = self.verifier.verify(bundle, &canvas_id.proof_signal()).await {
            warn!(canvas = %canvas_id, tile = tile_index, error = %e, "Fill refused");
            return Err(e.into());
        }

        let digest = bundle.digest();
        let nullifier = bundle.nullifier_hash;

        let mut guard = canvas.lock().await;

        if let Some(previous) = guard.replayed_outcome(&digest, tile_index, &image) {
            debug!(canvas = %canvas_id, digest = %short_hex(&digest), "Replayed fill attempt");
            return previous.map_err(StoreError::from);
        }

        let outcome = guard.try_fill(tile_index, image.clone(), nullifier, digest)?;

        match &outcome {
            FillOutcome::Accepted { completed, .. } => {
                let remaining = guard.remaining();
                info!(
                    canvas = %canvas_id,
                    tile = tile_index,
                    nullifier = %nullifier,
                    remaining,
                    "Tile accepted"
                );
                self.emit(CanvasEvent::TileFilled {
                    canvas_id,
                    tile_index,
                    image,
                    remaining,
                    snapshot_hash: hex::encode(guard.compute_hash()),
                });

                if *completed {
                    info!(canvas = %canvas_id, completed_by = %nullifier, "Canvas complete");
                    self.emit(CanvasEvent::CanvasCompleted { canvas_id });
                }
            }
            FillOutcome::Rejected { existing } => {
                debug!(canvas = %canvas_id, tile = tile_index, existing = %existing, "Tile conflict");
            }
        }
        drop(guard);

        if matches!(outcome, FillOutcome::Accepted { completed: true, .. })
            && self.config.allocate_on_complete
            && self.current_id().await == canvas_id
        {
            self.allocate_canvas().await;
        }

        Ok(outcome)
    }

    /// Mint a complete canvas exactly once.
    ///
    /// The canvas lock is held across the ledger call, so concurrent
    /// finalizers queue and observe `AlreadyFinalized`.
    pub async fn finalize(
        &self,
        canvas_id: CanvasId,
        flattened: ImageRef,
        bundle: &ProofBundle,
    ) -> Result<FinalizeOutcome, StoreError> {
        let canvas = self.canvas(canvas_id).await?;
        let mut guard = canvas.lock().await;

        if let Some(receipt) = guard.mint() {
            debug!(canvas = %canvas_id, "Finalize on minted canvas");
            return Ok(FinalizeOutcome::AlreadyFinalized(receipt.clone()));
        }

        if !guard.is_complete() {
            return Err(StoreError::NotComplete(canvas_id));
        }

        self.verifier.verify(bundle, &canvas_id.proof_signal()).await?;

        let receipt = match self.minter.mint(canvas_id, &flattened, bundle).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(canvas = %canvas_id, error = %e, "Mint failed; canvas stays complete");
                return Err(e.into());
            }
        };

        guard.record_mint(receipt.clone());
        self.emit(CanvasEvent::CanvasMinted {
            canvas_id,
            image_id: receipt.image_id.clone(),
            artifact_uri: receipt.artifact_uri.clone(),
        });
        drop(guard);

        self.prune_minted(canvas_id).await;
        Ok(FinalizeOutcome::Minted(receipt))
    }

    /// Drop the oldest minted canvases past `retain_minted`. The current
    /// canvas is never dropped.
    async fn prune_minted(&self, minted: CanvasId) {
        let evicted: Vec<CanvasId> = {
            let mut order = self.minted_order.lock().await;
            order.push_back(minted);
            let excess = order.len().saturating_sub(self.config.retain_minted);
            order.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }

        let current = self.current_id().await;
        let mut canvases = self.canvases.write().await;
        for id in evicted.iter().filter(|id| **id != current) {
            canvases.remove(id);
        }
        debug!(evicted = evicted.len(), held = canvases.len(), "Pruned minted canvases");
    }

    /// Store counters.
    pub async fn stats(&self) -> StoreStats {
        let canvases: Vec<_> = self.canvases.read().await.values().cloned().collect();
        let mut stats = StoreStats {
            current: Some(self.current_id().await),
            canvases: canvases.len(),
            ..Default::default()
        };

        for canvas in canvases {
            match canvas.lock().await.phase() {
                CanvasPhase::Open => {}
                CanvasPhase::Complete => stats.complete += 1,
                CanvasPhase::Minted => stats.minted += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;

    use crate::canvas::mint::LedgerMinter;
    use crate::canvas::tile::TileSlot;
    use crate::proof::bundle::{GroupId, Nullifier};
    use crate::proof::provider::{Identity, LocalProofProvider, ProofProvider};
    use crate::proof::verify::{GroupRegistry, external_nullifier_for};

    struct AcceptAll;

    #[async_trait]
    impl MembershipVerifier for AcceptAll {
        async fn verify(&self, _bundle: &ProofBundle, _signal: &str) -> Result<(), ProofError> {
            Ok(())
        }
    }

    fn img(s: &str) -> ImageRef {
        ImageRef::new(s).unwrap()
    }

    fn bundle(canvas_id: CanvasId, participant: u8, attempt: u32) -> ProofBundle {
        let signal = canvas_id.proof_signal();
        ProofBundle {
            proof: attempt.to_le_bytes().to_vec(),
            nullifier_hash: Nullifier([participant; 32]),
            external_nullifier: external_nullifier_for(&signal),
            merkle_root: [0; 32],
            group_id: GroupId(1),
            signal,
        }
    }

    fn open_store(tile_count: usize, allocate_on_complete: bool) -> CanvasStore {
        let config = StoreConfig {
            tile_count,
            allocate_on_complete,
            ..Default::default()
        };
        CanvasStore::new(config, Arc::new(AcceptAll), Arc::new(LedgerMinter::new("ipfs://t")))
    }

    #[tokio::test]
    async fn test_accepted_tile_in_next_snapshot() {
        let store = open_store(3, true);
        let id = store.current_id().await;

        let outcome = store.reserve_and_fill(id, 1, img("imgA"), &bundle(id, 1, 0)).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Accepted { completed: false, .. }));

        let snapshot = store.current().await.unwrap();
        assert_eq!(snapshot.tiles, vec![
            TileSlot::Empty,
            TileSlot::Filled(img("imgA")),
            TileSlot::Empty,
        ]);
    }

    #[tokio::test]
    async fn test_unknown_canvas() {
        let store = open_store(3, true);
        let other = CanvasId::new_random();
        let result = store.reserve_and_fill(other, 0, img("a"), &bundle(other, 1, 0)).await;
        assert!(matches!(result, Err(StoreError::UnknownCanvas(id)) if id == other));
    }

    #[tokio::test]
    async fn test_completion_allocates_next_canvas() {
        let store = open_store(2, true);
        let mut events = store.subscribe();
        let id = store.current_id().await;

        store.reserve_and_fill(id, 0, img("a"), &bundle(id, 1, 0)).await.unwrap();
        let last = store.reserve_and_fill(id, 1, img("b"), &bundle(id, 2, 0)).await.unwrap();
        assert!(matches!(last, FillOutcome::Accepted { completed: true, .. }));

        let next = store.current_id().await;
        assert_ne!(next, id);
        assert!(store.current().await.unwrap().tiles.iter().all(TileSlot::is_empty));
        assert_eq!(store.phase(id).await.unwrap(), CanvasPhase::Complete);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&CanvasEvent::CanvasCompleted { canvas_id: id }));
        assert!(seen.contains(&CanvasEvent::CanvasAllocated { canvas_id: next, tile_count: 2 }));
    }

    #[tokio::test]
    async fn test_identical_retry_is_idempotent() {
        let store = open_store(3, true);
        let id = store.current_id().await;
        let b = bundle(id, 1, 0);

        let first = store.reserve_and_fill(id, 0, img("a"), &b).await.unwrap();
        let again = store.reserve_and_fill(id, 0, img("a"), &b).await.unwrap();
        assert_eq!(first, again);

        let elsewhere = store.reserve_and_fill(id, 2, img("a"), &b).await;
        assert!(matches!(elsewhere, Err(StoreError::Proof(ProofError::Replayed))));
    }

    #[tokio::test]
    async fn test_loser_may_retry_with_fresh_bundle() {
        let store = open_store(3, true);
        let id = store.current_id().await;

        store.reserve_and_fill(id, 1, img("A"), &bundle(id, 1, 0)).await.unwrap();
        let lost = store.reserve_and_fill(id, 1, img("B"), &bundle(id, 2, 0)).await.unwrap();
        assert_eq!(lost, FillOutcome::Rejected { existing: img("A") });

        let retry = store.reserve_and_fill(id, 0, img("B"), &bundle(id, 2, 1)).await.unwrap();
        assert!(matches!(retry, FillOutcome::Accepted { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_tile_single_winner() {
        let store = Arc::new(open_store(4, false));
        let id = store.current_id().await;

        let mut handles = Vec::new();
        for p in 0..32u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let image = img(&format!("img{}", p));
                store.reserve_and_fill(id, 2, image, &bundle(id, p, 0)).await
            }));
        }

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                FillOutcome::Accepted { tiles, .. } => accepted.push(tiles[2].clone()),
                FillOutcome::Rejected { existing } => rejected.push(existing),
            }
        }

        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected.len(), 31);
        let winner = accepted[0].image().cloned().unwrap();
        assert!(rejected.iter().all(|e| *e == winner));
    }

    #[tokio::test]
    async fn test_finalize_exactly_once() {
        let registry = Arc::new(GroupRegistry::new());
        let group = GroupId(3);
        registry.create_group(group).await;
        let alice = Identity::from_secret_str("alice");
        registry.add_member(group, alice.commitment()).await.unwrap();

        let minter = Arc::new(LedgerMinter::new("ipfs://t"));
        let config = StoreConfig { tile_count: 1, ..Default::default() };
        let store = CanvasStore::new(config, registry.clone(), minter.clone());
        let provider = LocalProofProvider::new(registry, group);

        let id = store.current_id().await;
        let proof = provider.generate(&alice, &id.proof_signal()).await.unwrap();

        let early = store.finalize(id, img("flat"), &proof).await;
        assert!(matches!(early, Err(StoreError::NotComplete(_))));

        store.reserve_and_fill(id, 0, img("a"), &proof).await.unwrap();

        let first = store.finalize(id, img("flat"), &proof).await.unwrap();
        assert!(matches!(first, FinalizeOutcome::Minted(_)));
        for _ in 0..2 {
            let again = store.finalize(id, img("flat"), &proof).await.unwrap();
            assert_eq!(again, FinalizeOutcome::AlreadyFinalized(first.receipt().clone()));
        }
        assert_eq!(minter.minted_count(), 1);

        let stats = store.stats().await;
        assert_eq!(stats.minted, 1);
        assert_eq!(stats.canvases, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_finalize_mints_once() {
        let minter = Arc::new(LedgerMinter::new("ipfs://t"));
        let config = StoreConfig { tile_count: 1, ..Default::default() };
        let store = Arc::new(CanvasStore::new(config, Arc::new(AcceptAll), minter.clone()));
        let id = store.current_id().await;
        let proof = bundle(id, 1, 0);
        store.reserve_and_fill(id, 0, img("a"), &proof).await.unwrap();

        let (a, b) = tokio::join!(
            store.finalize(id, img("flat"), &proof),
            store.finalize(id, img("flat"), &proof),
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        let minted = outcomes.iter().filter(|o| matches!(o, FinalizeOutcome::Minted(_))).count();
        let already = outcomes.iter().filter(|o| matches!(o, FinalizeOutcome::AlreadyFinalized(_))).count();
        assert_eq!((minted, already), (1, 1));
        assert_eq!(outcomes[0].receipt(), outcomes[1].receipt());
        assert_eq!(minter.minted_count(), 1);
    }

    #[tokio::test]
    async fn test_old_minted_canvases_pruned() {
        let config = StoreConfig { tile_count: 1, retain_minted: 1, ..Default::default() };
        let store = CanvasStore::new(config, Arc::new(AcceptAll), Arc::new(LedgerMinter::new("ipfs://t")));

        let mut minted = Vec::new();
        for p in 0..2u8 {
            let id = store.current_id().await;
            let proof = bundle(id, p, 0);
            store.reserve_and_fill(id, 0, img("a"), &proof).await.unwrap();
            store.finalize(id, img("flat"), &proof).await.unwrap();
            minted.push((id, proof));
        }

        let (old, old_proof) = &minted[0];
        let (recent, recent_proof) = &minted[1];
        assert!(matches!(
            store.finalize(*old, img("flat"), old_proof).await,
            Err(StoreError::UnknownCanvas(_))
        ));
        assert!(matches!(
            store.finalize(*recent, img("flat"), recent_proof).await,
            Ok(FinalizeOutcome::AlreadyFinalized(_))
        ));

        let stats = store.stats().await;
        assert_eq!(stats.canvases, 2);
        assert_eq!(stats.minted, 1);
    }

    #[tokio::test]
    async fn test_foreign_proof_refused() {
        let registry = Arc::new(GroupRegistry::new());
        registry.create_group(GroupId(1)).await;
        let store = CanvasStore::new(
            StoreConfig::default(),
            registry,
            Arc::new(LedgerMinter::new("ipfs://t")),
        );
        let id = store.current_id().await;

        let result = store.reserve_and_fill(id, 0, img("a"), &bundle(id, 1, 0)).await;
        assert!(matches!(result, Err(StoreError::Proof(ProofError::UnknownRoot))));
        assert!(store.current().await.unwrap().tiles.iter().all(TileSlot::is_empty));
    }

    proptest! {
        #[test]
        fn prop_single_acceptance_and_completion(
            attempts in prop::collection::vec((0u8..6, 0usize..5), 1..40)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = open_store(5, false);
                let id = store.current_id().await;

                let mut winners: BTreeMap<usize, ImageRef> = BTreeMap::new();
                let mut completions = 0;

                for (n, (participant, index)) in attempts.iter().enumerate() {
                    let image = img(&format!("p{}-{}", participant, n));
                    let result = store
                        .reserve_and_fill(id, *index, image.clone(), &bundle(id, *participant, n as u32))
                        .await;

                    match result {
                        Ok(FillOutcome::Accepted { completed, .. }) => {
                            prop_assert!(winners.insert(*index, image).is_none());
                            if completed {
                                completions += 1;
                            }
                        }
                        Ok(FillOutcome::Rejected { existing }) => {
                            prop_assert_eq!(winners.get(index), Some(&existing));
                        }
                        Err(StoreError::Proof(ProofError::NullifierUsed)) => {}
                        Err(e) => prop_assert!(false, "unexpected error {}", e),
                    }
                }

                prop_assert!(completions <= 1);
                prop_assert_eq!(completions == 1, winners.len() == 5);
                Ok(())
            })?;
        }
    }
}
