//! IdentityGallery - Cross-session person identities
//!
//! ## Responsibilities
//!
//! - Resolve ephemeral (camera, track) keys into durable global ids
//! - Appearance matching by cosine similarity over per-identity ring buffers
//! - Confirmation window before a new identity is allocated
//! - Pruning of idle identities, persistence across restarts
//!
//! ## Matching
//!
//! A bound track is answered from the binding table without touching the
//! extractor. An unbound track is matched against every stored embedding of
//! every identity; on a miss its embedding is buffered and, once the
//! confirmation window is full, the buffer mean gets a second chance before
//! a new id is allocated. Ids only ever grow.

mod repository;
mod types;

pub use repository::{GalleryRepository, StoredEntry, StoredGallery};
pub use types::*;

use crate::error::Result;
use crate::vision::{cosine_similarity, l2_normalize, mean_vector, EmbeddingExtractor};
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::collections::{BTreeMap, HashMap};

/// IdentityGallery instance (owned by the detection worker)
pub struct IdentityGallery {
    extractor: Box<dyn EmbeddingExtractor>,
    settings: GallerySettings,
    /// global id -> identity
    identities: BTreeMap<GlobalId, GlobalIdentity>,
    /// track key -> bound global id
    bindings: HashMap<TrackKey, GlobalId>,
    /// Embeddings of unbound tracks inside the confirmation window
    pending: HashMap<TrackKey, Vec<Vec<f32>>>,
    /// `None` once the id space is exhausted
    next_id: Option<GlobalId>,
    repository: Option<GalleryRepository>,
}

impl IdentityGallery {
    /// Create an empty, memory-only gallery
    pub fn new(extractor: Box<dyn EmbeddingExtractor>, settings: GallerySettings) -> Self {
        Self {
            extractor,
            settings,
            identities: BTreeMap::new(),
            bindings: HashMap::new(),
            pending: HashMap::new(),
            next_id: Some(1),
            repository: None,
        }
    }

    /// Create a gallery backed by a file, restoring stored identities.
    ///
    /// An unreadable file is logged and treated as empty so the pipeline can
    /// still start.
    pub fn with_repository(
        extractor: Box<dyn EmbeddingExtractor>,
        settings: GallerySettings,
        repository: GalleryRepository,
    ) -> Self {
        let mut gallery = Self::new(extractor, settings);
        match repository.load() {
            Ok(stored) => {
                let restored = stored.entries.len();
                gallery.restore(stored.entries);
                gallery.reserve_through(stored.max_id);
                tracing::info!(
                    path = %repository.path().display(),
                    identities = restored,
                    max_id = gallery.max_allocated_id(),
                    "Identity gallery restored"
                );
            }
            Err(e) => {
                tracing::warn!(
                    path = %repository.path().display(),
                    error = %e,
                    "Failed to load identity gallery, starting empty"
                );
            }
        }
        gallery.repository = Some(repository);
        gallery
    }

    /// Seed identities (e.g. from disk). Id numbering resumes at max + 1.
    pub fn restore(&mut self, entries: Vec<StoredEntry>) {
        for entry in entries {
            let mut identity =
                GlobalIdentity::new(entry.id, self.settings.gallery_size, entry.last_seen);
            identity.push_embedding(entry.embedding, self.settings.gallery_size);
            self.identities.insert(entry.id, identity);
        }
        let max_id = self.identities.keys().next_back().copied().unwrap_or(0);
        self.reserve_through(max_id);
    }

    /// Mark every id up to `max_id` as taken
    pub fn reserve_through(&mut self, max_id: GlobalId) {
        let Some(next) = self.next_id else {
            return;
        };
        if max_id >= next {
            self.next_id = max_id.checked_add(1);
            if self.next_id.is_none() {
                tracing::error!(max_id, "Global id space exhausted, new tracks stay tentative");
            }
        }
    }

    /// Resolve a track to a global id using the current time
    pub fn resolve(&mut self, key: &TrackKey, crop: Option<&RgbImage>) -> GlobalId {
        self.resolve_at(key, crop, Utc::now())
    }

    /// Resolve a track to a global id.
    ///
    /// Returns a negative sentinel while the track is unconfirmed or its
    /// embedding could not be extracted.
    pub fn resolve_at(
        &mut self,
        key: &TrackKey,
        crop: Option<&RgbImage>,
        now: DateTime<Utc>,
    ) -> GlobalId {
        match self.resolve_detailed(key, crop, now) {
            Resolution::Bound(id)
            | Resolution::Matched { id, .. }
            | Resolution::MatchedAverage { id, .. }
            | Resolution::Created(id) => id,
            Resolution::Pending { .. }
            | Resolution::ExtractionFailed
            | Resolution::IdsExhausted => {
                tentative_id(key.local_track_id)
            }
        }
    }

    /// Resolve and report which path answered
    pub fn resolve_detailed(
        &mut self,
        key: &TrackKey,
        crop: Option<&RgbImage>,
        now: DateTime<Utc>,
    ) -> Resolution {
        if let Some(&id) = self.bindings.get(key) {
            if let Some(identity) = self.identities.get_mut(&id) {
                identity.last_seen = now;
            }
            return Resolution::Bound(id);
        }

        let Some(embedding) = crop
            .and_then(|c| self.extractor.extract(c))
            .and_then(l2_normalize)
        else {
            tracing::trace!(track = %key, "Embedding extraction failed");
            return Resolution::ExtractionFailed;
        };

        if let Some((id, similarity)) = self.best_match(&embedding) {
            self.bind(key, id, embedding, now);
            tracing::debug!(track = %key, global_id = id, similarity, "Track matched");
            return Resolution::Matched { id, similarity };
        }

        let buffer = self.pending.entry(key.clone()).or_default();
        buffer.push(embedding.clone());
        if buffer.len() < self.settings.confirm_frames {
            return Resolution::Pending {
                observations: buffer.len(),
            };
        }

        let seed = mean_vector(buffer)
            .and_then(l2_normalize)
            .unwrap_or_else(|| embedding.clone());

        if let Some((id, similarity)) = self.best_match(&seed) {
            self.bind(key, id, embedding, now);
            tracing::debug!(track = %key, global_id = id, similarity, "Track matched on averaged embedding");
            return Resolution::MatchedAverage { id, similarity };
        }

        let Some(id) = self.next_id else {
            tracing::warn!(track = %key, "Global id space exhausted");
            self.pending.remove(key);
            return Resolution::IdsExhausted;
        };
        self.next_id = id.checked_add(1);
        let mut identity = GlobalIdentity::new(id, self.settings.gallery_size, now);
        identity.push_embedding(seed, self.settings.gallery_size);
        self.identities.insert(id, identity);
        self.bindings.insert(key.clone(), id);
        self.pending.remove(key);

        tracing::info!(track = %key, global_id = id, "New identity created");
        Resolution::Created(id)
    }

    /// Drop a track's binding and pending buffer (tracker deleted it)
    pub fn release_track(&mut self, key: &TrackKey, now: DateTime<Utc>) {
        self.pending.remove(key);
        if let Some(id) = self.bindings.remove(key) {
            if let Some(identity) = self.identities.get_mut(&id) {
                identity.last_seen = now;
            }
        }
    }

    /// Keys currently bound for a camera
    pub fn tracked_keys(&self, camera_id: &str) -> Vec<TrackKey> {
        self.bindings
            .keys()
            .chain(self.pending.keys())
            .filter(|k| k.camera_id == camera_id)
            .cloned()
            .collect()
    }

    /// Remove identities idle beyond the memory horizon, along with any
    /// binding still pointing at them. Returns the number removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let horizon = chrono::Duration::from_std(self.settings.memory_horizon)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 1000));

        let expired: Vec<GlobalId> = self
            .identities
            .values()
            .filter(|identity| now.signed_duration_since(identity.last_seen) > horizon)
            .map(|identity| identity.id)
            .collect();

        for id in &expired {
            self.identities.remove(id);
        }
        if !expired.is_empty() {
            self.bindings.retain(|_, id| !expired.contains(id));
            tracing::info!(removed = expired.len(), "Pruned idle identities");
        }
        expired.len()
    }

    /// Write the gallery to its repository, if any
    pub fn flush(&self) -> Result<()> {
        if let Some(repository) = &self.repository {
            let saved = repository.save(self.identities.values(), self.max_allocated_id())?;
            tracing::info!(
                path = %repository.path().display(),
                identities = saved,
                "Identity gallery saved"
            );
        }
        Ok(())
    }

    /// Highest id handed out so far (0 when none)
    pub fn max_allocated_id(&self) -> GlobalId {
        self.next_id.map_or(GlobalId::MAX, |next| next - 1)
    }

    /// Number of ids ever allocated (including restored ones)
    pub fn allocated_count(&self) -> u64 {
        self.max_allocated_id().max(0) as u64
    }

    /// Identities currently held
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn identity(&self, id: GlobalId) -> Option<&GlobalIdentity> {
        self.identities.get(&id)
    }

    pub fn binding(&self, key: &TrackKey) -> Option<GlobalId> {
        self.bindings.get(key).copied()
    }

    /// Best match at or above the threshold across every stored embedding
    fn best_match(&self, embedding: &[f32]) -> Option<(GlobalId, f32)> {
        let mut best: Option<(GlobalId, f32)> = None;
        for identity in self.identities.values() {
            for stored in &identity.embeddings {
                let similarity = cosine_similarity(embedding, stored);
                if best.map_or(true, |(_, s)| similarity > s) {
                    best = Some((identity.id, similarity));
                }
            }
        }
        best.filter(|(_, similarity)| *similarity >= self.settings.similarity_threshold)
    }

    fn bind(&mut self, key: &TrackKey, id: GlobalId, embedding: Vec<f32>, now: DateTime<Utc>) {
        self.bindings.insert(key.clone(), id);
        self.pending.remove(key);
        if let Some(identity) = self.identities.get_mut(&id) {
            identity.push_embedding(embedding, self.settings.gallery_size);
            identity.last_seen = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Embedding = normalized RGB of the crop's first pixel; black fails
    struct PixelExtractor {
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingExtractor for PixelExtractor {
        fn extract(&self, crop: &RgbImage) -> Option<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let p = crop.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return None;
            }
            Some(p.0.iter().map(|c| *c as f32).collect())
        }
    }

    fn crop_of(rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(4, 4, image::Rgb(rgb))
    }

    fn gallery(confirm_frames: usize) -> (IdentityGallery, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let settings = GallerySettings {
            confirm_frames,
            ..GallerySettings::default()
        };
        let g = IdentityGallery::new(
            Box::new(PixelExtractor {
                calls: calls.clone(),
            }),
            settings,
        );
        (g, calls)
    }

    #[test]
    fn test_first_track_creates_identity() {
        let (mut g, _) = gallery(1);
        let key = TrackKey::new("0", 1);
        assert_eq!(g.resolve(&key, Some(&crop_of([200, 0, 0]))), 1);
        assert_eq!(g.allocated_count(), 1);
        assert_eq!(g.binding(&key), Some(1));
    }

    #[test]
    fn test_bound_track_skips_extraction() {
        let (mut g, calls) = gallery(1);
        let key = TrackKey::new("0", 1);
        g.resolve(&key, Some(&crop_of([200, 0, 0])));
        let before = calls.load(Ordering::SeqCst);

        // Completely different appearance, still the bound id
        assert_eq!(g.resolve(&key, Some(&crop_of([0, 0, 200]))), 1);
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_similar_crop_on_other_camera_matches() {
        let (mut g, _) = gallery(1);
        g.resolve(&TrackKey::new("0", 1), Some(&crop_of([200, 10, 0])));
        let id = g.resolve(&TrackKey::new("1", 42), Some(&crop_of([190, 20, 0])));
        assert_eq!(id, 1);
        assert_eq!(g.allocated_count(), 1);
        assert_eq!(g.identity(1).unwrap().embeddings.len(), 2);
    }

    #[test]
    fn test_dissimilar_crop_gets_new_id() {
        let (mut g, _) = gallery(1);
        g.resolve(&TrackKey::new("0", 1), Some(&crop_of([200, 0, 0])));
        let id = g.resolve(&TrackKey::new("0", 2), Some(&crop_of([0, 0, 200])));
        assert_eq!(id, 2);
    }

    #[test]
    fn test_extraction_failure_is_tentative() {
        let (mut g, _) = gallery(1);
        let key = TrackKey::new("0", 7);
        assert_eq!(g.resolve(&key, Some(&crop_of([0, 0, 0]))), -7);
        assert_eq!(g.resolve(&key, None), -7);
        assert_eq!(g.allocated_count(), 0);
        assert!(g.binding(&key).is_none());
    }

    #[test]
    fn test_confirmation_window() {
        let (mut g, _) = gallery(3);
        let key = TrackKey::new("0", 5);
        let crop = crop_of([0, 200, 0]);
        let now = Utc::now();

        assert_eq!(
            g.resolve_detailed(&key, Some(&crop), now),
            Resolution::Pending { observations: 1 }
        );
        assert_eq!(
            g.resolve_detailed(&key, Some(&crop), now),
            Resolution::Pending { observations: 2 }
        );
        assert_eq!(g.resolve_detailed(&key, Some(&crop), now), Resolution::Created(1));
        assert_eq!(g.resolve(&key, Some(&crop)), 1);
    }

    #[test]
    fn test_average_second_chance() {
        let (mut g, _) = gallery(2);
        let now = Utc::now();
        // Identity 1 looks like (1, 1, 0)
        g.restore(vec![StoredEntry {
            id: 1,
            embedding: l2_normalize(vec![1.0, 1.0, 0.0]).unwrap(),
            last_seen: now,
        }]);

        let key = TrackKey::new("0", 9);
        // Each sample alone misses; their mean clears the threshold
        let a = crop_of([255, 0, 200]); // cos ≈ 0.556 vs (1,1,0)
        let b = crop_of([0, 255, 200]); // cos ≈ 0.556
        assert_eq!(
            g.resolve_detailed(&key, Some(&a), now),
            Resolution::Pending { observations: 1 }
        );
        match g.resolve_detailed(&key, Some(&b), now) {
            Resolution::MatchedAverage { id, similarity } => {
                assert_eq!(id, 1);
                assert!(similarity >= 0.65);
            }
            other => panic!("expected averaged match, got {:?}", other),
        }
        assert_eq!(g.allocated_count(), 1);
    }

    #[test]
    fn test_restore_resumes_numbering() {
        let (mut g, _) = gallery(1);
        g.restore(vec![
            StoredEntry {
                id: 4,
                embedding: vec![1.0, 0.0, 0.0],
                last_seen: Utc::now(),
            },
            StoredEntry {
                id: 11,
                embedding: vec![0.0, 1.0, 0.0],
                last_seen: Utc::now(),
            },
        ]);
        let id = g.resolve(&TrackKey::new("0", 1), Some(&crop_of([0, 0, 255])));
        assert_eq!(id, 12);
        assert_eq!(g.allocated_count(), 11);
    }

    #[test]
    fn test_prune_removes_idle_identities_and_bindings() {
        let (mut g, _) = gallery(1);
        let old = Utc::now() - chrono::Duration::days(800);
        let key = TrackKey::new("0", 1);
        g.resolve_at(&key, Some(&crop_of([200, 0, 0])), old);

        assert_eq!(g.prune(Utc::now()), 1);
        assert_eq!(g.identity_count(), 0);
        assert!(g.binding(&key).is_none());

        // Ids are not reused after pruning
        let id = g.resolve(&TrackKey::new("0", 2), Some(&crop_of([200, 0, 0])));
        assert_eq!(id, 2);
    }

    #[test]
    fn test_release_track() {
        let (mut g, _) = gallery(1);
        let key = TrackKey::new("0", 1);
        g.resolve(&key, Some(&crop_of([200, 0, 0])));
        assert_eq!(g.tracked_keys("0"), vec![key.clone()]);
        let released_at = Utc::now() + chrono::Duration::seconds(30);
        g.release_track(&key, released_at);
        assert!(g.binding(&key).is_none());
        assert!(g.tracked_keys("0").is_empty());
        assert_eq!(g.identity_count(), 1);
        assert_eq!(g.identity(1).unwrap().last_seen, released_at);
    }

    #[test]
    fn test_exhausted_id_space_stays_tentative() {
        let (mut g, _) = gallery(1);
        g.restore(vec![StoredEntry {
            id: GlobalId::MAX,
            embedding: vec![1.0, 0.0, 0.0],
            last_seen: Utc::now(),
        }]);
        assert_eq!(g.allocated_count(), GlobalId::MAX as u64);

        let key = TrackKey::new("0", 3);
        assert_eq!(
            g.resolve_detailed(&key, Some(&crop_of([0, 0, 255])), Utc::now()),
            Resolution::IdsExhausted
        );
        assert_eq!(g.resolve(&key, Some(&crop_of([0, 0, 255]))), -3);
        // Matching existing identities still works
        assert_eq!(g.resolve(&TrackKey::new("0", 4), Some(&crop_of([255, 0, 0]))), GlobalId::MAX);
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reid_gallery.json");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut g = IdentityGallery::with_repository(
            Box::new(PixelExtractor {
                calls: calls.clone(),
            }),
            GallerySettings::default(),
            GalleryRepository::new(&path),
        );
        g.resolve(&TrackKey::new("0", 1), Some(&crop_of([200, 0, 0])));
        g.resolve(&TrackKey::new("0", 2), Some(&crop_of([0, 0, 200])));
        g.flush().unwrap();

        let mut reloaded = IdentityGallery::with_repository(
            Box::new(PixelExtractor { calls }),
            GallerySettings::default(),
            GalleryRepository::new(&path),
        );
        assert_eq!(reloaded.identity_count(), 2);
        assert_eq!(reloaded.allocated_count(), 2);
        // Same appearance after restart maps back to the stored identity
        let id = reloaded.resolve(&TrackKey::new("1", 99), Some(&crop_of([0, 0, 210])));
        assert_eq!(id, 2);
    }

    #[test]
    fn test_pruned_top_id_not_reused_after_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reid_gallery.json");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut g = IdentityGallery::with_repository(
            Box::new(PixelExtractor {
                calls: calls.clone(),
            }),
            GallerySettings::default(),
            GalleryRepository::new(&path),
        );
        let old = Utc::now() - chrono::Duration::days(800);
        g.resolve(&TrackKey::new("0", 1), Some(&crop_of([200, 0, 0])));
        g.resolve_at(&TrackKey::new("0", 2), Some(&crop_of([0, 0, 200])), old);
        assert_eq!(g.prune(Utc::now()), 1);
        g.flush().unwrap();

        let mut reloaded = IdentityGallery::with_repository(
            Box::new(PixelExtractor { calls }),
            GallerySettings::default(),
            GalleryRepository::new(&path),
        );
        assert_eq!(reloaded.identity_count(), 1);
        assert_eq!(reloaded.allocated_count(), 2);
        let id = reloaded.resolve(&TrackKey::new("0", 7), Some(&crop_of([0, 200, 0])));
        assert_eq!(id, 3);
    }
}
