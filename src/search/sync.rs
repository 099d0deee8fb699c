//! Reconciles note store contents into the search index.
//!
//! The synchronizer owns the only write path into the index. Upserts are
//! insert-or-ignore: the index rejects duplicate ids and the rejection is
//! swallowed here, so re-syncing a snapshot is idempotent. A full rebuild
//! constructs and populates a fresh index before swapping it in, so readers
//! never observe a half-built index.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use crate::notes::Note;
use crate::search::index::{IndexDoc, IndexError, IndexSchema, SearchIndex};
use crate::search::EMBEDDING_DIMENSIONS;

pub struct IndexSynchronizer {
    index: Arc<RwLock<SearchIndex>>,
    /// Set while a bulk re-embedding is in flight; incremental upserts are
    /// skipped until the closing rebuild.
    paused: AtomicBool,
}

impl IndexSynchronizer {
    pub fn new() -> Self {
        Self {
            index: Arc::new(RwLock::new(Self::build_index())),
            paused: AtomicBool::new(false),
        }
    }

    /// Vector-capable schema, with a keyword-only fallback so search keeps
    /// working when the vector subsystem is broken.
    fn build_index() -> SearchIndex {
        match SearchIndex::new(IndexSchema::Hybrid {
            dimensions: EMBEDDING_DIMENSIONS,
        }) {
            Ok(index) => index,
            Err(err) => {
                log::warn!("vector index unavailable ({err}), falling back to keyword-only schema");
                SearchIndex::new(IndexSchema::Lexical)
                    .expect("keyword-only schema construction is infallible")
            }
        }
    }

    /// Shared read handle for the query engine.
    pub fn handle(&self) -> Arc<RwLock<SearchIndex>> {
        self.index.clone()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn indexed_count(&self) -> usize {
        self.index.read().unwrap().len()
    }

    /// Insert-if-absent. Duplicate ids are expected and ignored.
    pub fn upsert(&self, note: &Note) {
        if self.is_paused() {
            log::debug!("index sync paused, skipping upsert for {}", note.id);
            return;
        }

        let mut index = self.index.write().unwrap();
        Self::insert_tolerant(&mut index, note);
    }

    /// Upsert a whole snapshot under a single write lock.
    pub fn sync_all(&self, notes: &[Note]) {
        if self.is_paused() {
            log::debug!("index sync paused, skipping snapshot sync");
            return;
        }

        let mut index = self.index.write().unwrap();
        for note in notes {
            Self::insert_tolerant(&mut index, note);
        }
    }

    pub fn remove(&self, note_id: &crate::nid::NoteId) {
        self.index.write().unwrap().remove(note_id);
    }

    /// Discard the index and rebuild it from the given snapshot. The swap
    /// happens only after the fresh index is fully populated.
    pub fn rebuild(&self, notes: &[Note]) {
        let mut fresh = Self::build_index();
        for note in notes {
            Self::insert_tolerant(&mut fresh, note);
        }

        let count = fresh.len();
        *self.index.write().unwrap() = fresh;
        log::info!("search index rebuilt with {count} entries");
    }

    fn insert_tolerant(index: &mut SearchIndex, note: &Note) {
        match index.insert(note.id.clone(), IndexDoc::from_note(note)) {
            Ok(()) => {}
            Err(IndexError::DuplicateId(_)) => {
                // already indexed; last full value wins at the next rebuild
            }
            Err(err) => {
                log::warn!("failed to index note {}: {err}", note.id);
            }
        }
    }
}

impl Default for IndexSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nid::NoteId;
    use crate::notes::{AiStatus, Category, Intent};
    use crate::search::index::SearchRequest;
    use crate::search::lexical::FieldBoosts;

    fn note(id: &str, content: &str) -> Note {
        Note {
            id: NoteId::from(id),
            content: content.to_string(),
            original_content: None,
            timestamp: 1,
            ai_status: AiStatus::Completed,
            category: Category::Tech,
            headline: "Headline".to_string(),
            tags: vec![],
            intent: Intent::Reference,
            embedding: None,
            rag_enabled: false,
            calendar_sync: false,
            event_details: None,
        }
    }

    fn search_ids(sync: &IndexSynchronizer, term: &str) -> Vec<NoteId> {
        let req = SearchRequest {
            term: term.to_string(),
            limit: 20,
            boosts: FieldBoosts::default(),
            semantic_weight: 0.6,
            vector: None,
        };
        sync.handle()
            .read()
            .unwrap()
            .search(&req)
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let sync = IndexSynchronizer::new();
        let n = note("n1", "singular content marker");

        sync.upsert(&n);
        sync.upsert(&n);
        sync.sync_all(&[n.clone()]);

        assert_eq!(sync.indexed_count(), 1);
        assert_eq!(search_ids(&sync, "singular marker").len(), 1);
    }

    #[test]
    fn test_paused_sync_skips_upserts() {
        let sync = IndexSynchronizer::new();
        sync.pause();

        sync.upsert(&note("n1", "alpha"));
        sync.sync_all(&[note("n2", "beta")]);
        assert_eq!(sync.indexed_count(), 0);

        sync.resume();
        sync.upsert(&note("n1", "alpha"));
        assert_eq!(sync.indexed_count(), 1);
    }

    #[test]
    fn test_rebuild_drops_stale_entries() {
        let sync = IndexSynchronizer::new();
        sync.upsert(&note("stale", "ghost entry"));
        sync.upsert(&note("kept", "live entry"));
        assert_eq!(sync.indexed_count(), 2);

        sync.rebuild(&[note("kept", "live entry")]);

        assert_eq!(sync.indexed_count(), 1);
        assert!(search_ids(&sync, "ghost").is_empty());
        assert_eq!(search_ids(&sync, "live").len(), 1);
    }

    #[test]
    fn test_rebuild_refreshes_document_content() {
        let sync = IndexSynchronizer::new();
        sync.upsert(&note("n1", "original wording"));

        // incremental upsert of changed content is ignored (duplicate id)
        sync.upsert(&note("n1", "revised wording"));
        assert_eq!(search_ids(&sync, "revised").len(), 0);

        // the rebuild picks up the latest value
        sync.rebuild(&[note("n1", "revised wording")]);
        assert_eq!(search_ids(&sync, "revised").len(), 1);
        assert!(search_ids(&sync, "original").is_empty());
    }

    #[test]
    fn test_remove() {
        let sync = IndexSynchronizer::new();
        let n = note("n1", "to be removed");
        sync.upsert(&n);

        sync.remove(&n.id);
        assert_eq!(sync.indexed_count(), 0);
    }
}
