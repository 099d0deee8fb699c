//! Debounced hybrid query execution.
//!
//! A query runs against the shared index with a best-effort query embedding.
//! Failure paths, in order: a failed hybrid request retries keyword-only; an
//! unavailable index falls back to a naive substring scan over the note
//! store snapshot (handled by the caller via [`QueryOutcome::Unavailable`]).

use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc, Arc, RwLock,
};
use std::thread;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::nid::NoteId;
use crate::notes::Note;
use crate::search::embeddings::EmbeddingProvider;
use crate::search::index::{SearchIndex, SearchRequest, VectorQuery};
use crate::search::lexical::FieldBoosts;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Empty/whitespace query: search is bypassed, show the whole
    /// collection in its natural order.
    All,
    /// Ids ordered by descending relevance. May reference deleted notes;
    /// the caller filters against the store.
    Ranked(Vec<NoteId>),
    /// The index could not be read; fall back to a substring scan.
    Unavailable,
}

pub struct QueryEngine {
    index: Arc<RwLock<SearchIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl QueryEngine {
    pub fn new(
        index: Arc<RwLock<SearchIndex>>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn execute(&self, raw: &str) -> QueryOutcome {
        let term = raw.trim();
        if term.is_empty() {
            return QueryOutcome::All;
        }

        // best-effort: a missing embedding just means keyword-only
        let vector = self.embedder.embed(term).map(|value| VectorQuery {
            value,
            similarity: self.config.min_similarity,
        });

        let request = SearchRequest {
            term: term.to_string(),
            limit: self.config.limit,
            boosts: FieldBoosts::default(),
            semantic_weight: self.config.semantic_weight,
            vector,
        };

        let index = match self.index.read() {
            Ok(guard) => guard,
            Err(err) => {
                log::error!("search index unavailable: {err}");
                return QueryOutcome::Unavailable;
            }
        };

        match index.search(&request) {
            Ok(hits) => QueryOutcome::Ranked(hits.into_iter().map(|h| h.id).collect()),
            Err(err) => {
                log::warn!("hybrid search failed ({err}), retrying keyword-only");
                let retry = SearchRequest {
                    vector: None,
                    ..request
                };
                match index.search(&retry) {
                    Ok(hits) => {
                        QueryOutcome::Ranked(hits.into_iter().map(|h| h.id).collect())
                    }
                    Err(err) => {
                        log::error!("keyword-only retry failed: {err}");
                        QueryOutcome::Ranked(vec![])
                    }
                }
            }
        }
    }
}

/// Last-resort matching when the index itself is unusable: case-insensitive
/// substring scan over note content, natural order preserved.
pub fn substring_fallback(notes: &[Note], raw: &str) -> Vec<NoteId> {
    let needle = raw.trim().to_lowercase();
    if needle.is_empty() {
        return notes.iter().map(|n| n.id.clone()).collect();
    }

    notes
        .iter()
        .filter(|n| n.content.to_lowercase().contains(&needle))
        .map(|n| n.id.clone())
        .collect()
}

/// A delivered query result, tagged with its debounce token.
#[derive(Debug)]
pub struct QueryResponse {
    pub token: u64,
    pub query: String,
    pub outcome: QueryOutcome,
}

/// Keystroke debouncing with stale-result discard.
///
/// Each submission bumps the generation counter; a submission only executes
/// if it is still the latest when its idle window elapses, and its result is
/// only delivered if it is still the latest after execution.
pub struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn submit(
        &self,
        query: String,
        engine: Arc<QueryEngine>,
        sink: mpsc::Sender<QueryResponse>,
    ) {
        let token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let window = self.window;

        thread::spawn(move || {
            thread::sleep(window);
            if generation.load(Ordering::SeqCst) != token {
                // superseded during the idle window
                return;
            }

            let outcome = engine.execute(&query);

            if generation.load(Ordering::SeqCst) != token {
                // a newer query started while this one ran
                return;
            }

            let _ = sink.send(QueryResponse {
                token,
                query,
                outcome,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nid::NoteId;
    use crate::notes::{AiStatus, Category, Intent};
    use crate::search::index::{IndexDoc, IndexSchema};
    use crate::search::EMBEDDING_DIMENSIONS;
    use std::sync::atomic::AtomicUsize;

    struct NullEmbedder {
        calls: AtomicUsize,
    }

    impl NullEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl EmbeddingProvider for NullEmbedder {
        fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    /// Always produces the same unit vector.
    struct ConstEmbedder;

    impl EmbeddingProvider for ConstEmbedder {
        fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            let mut v = vec![0.0; EMBEDDING_DIMENSIONS];
            v[0] = 1.0;
            Some(v)
        }
    }

    fn doc(content: &str) -> IndexDoc {
        IndexDoc {
            content: content.to_string(),
            headline: "Headline".to_string(),
            category: "Tech".to_string(),
            tags: vec![],
            intent: "reference".to_string(),
            embedding: None,
        }
    }

    fn note(id: &str, content: &str) -> Note {
        Note {
            id: NoteId::from(id),
            content: content.to_string(),
            original_content: None,
            timestamp: 1,
            ai_status: AiStatus::Completed,
            category: Category::Tech,
            headline: String::new(),
            tags: vec![],
            intent: Intent::Reference,
            embedding: None,
            rag_enabled: false,
            calendar_sync: false,
            event_details: None,
        }
    }

    fn engine_over(
        schema: IndexSchema,
        docs: Vec<(&str, &str)>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Arc<QueryEngine> {
        let mut index = SearchIndex::new(schema).unwrap();
        for (id, content) in docs {
            index.insert(NoteId::from(id), doc(content)).unwrap();
        }
        Arc::new(QueryEngine::new(
            Arc::new(RwLock::new(index)),
            embedder,
            SearchConfig::default(),
        ))
    }

    #[test]
    fn test_empty_query_bypasses_search() {
        let embedder = NullEmbedder::new();
        let engine = engine_over(IndexSchema::Lexical, vec![], embedder.clone());

        assert_eq!(engine.execute(""), QueryOutcome::All);
        assert_eq!(engine.execute("   \t"), QueryOutcome::All);
        // the embedder is never consulted for a bypassed query
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lexical_only_when_embedding_fails() {
        let embedder = NullEmbedder::new();
        let engine = engine_over(
            IndexSchema::Lexical,
            vec![("n1", "quantum coupling notes"), ("n2", "grocery list")],
            embedder,
        );

        let outcome = engine.execute("quantum");
        match outcome {
            QueryOutcome::Ranked(ids) => {
                assert_eq!(ids.len(), 1);
                assert_eq!(*ids[0], "n1");
            }
            other => panic!("expected ranked outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_vector_failure_retries_keyword_only() {
        // keyword-only schema + an embedder that insists on producing
        // vectors: the hybrid request fails and the retry must still match
        let engine = engine_over(
            IndexSchema::Lexical,
            vec![("n1", "quantum coupling notes")],
            Arc::new(ConstEmbedder),
        );

        let outcome = engine.execute("quantum");
        match outcome {
            QueryOutcome::Ranked(ids) => {
                assert_eq!(ids.len(), 1);
                assert_eq!(*ids[0], "n1");
            }
            other => panic!("expected ranked outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_substring_fallback() {
        let notes = vec![
            note("n1", "Meet Dana at the relay station"),
            note("n2", "groceries: oat milk"),
        ];

        let ids = substring_fallback(&notes, "RELAY");
        assert_eq!(ids.len(), 1);
        assert_eq!(*ids[0], "n1");

        // empty query preserves natural order
        let ids = substring_fallback(&notes, "  ");
        assert_eq!(ids.len(), 2);
        assert_eq!(*ids[0], "n1");
    }

    #[test]
    fn test_debounce_executes_only_last_query() {
        let embedder = NullEmbedder::new();
        let engine = engine_over(
            IndexSchema::Lexical,
            vec![("n1", "apple orchard visit")],
            embedder.clone(),
        );

        let debouncer = Debouncer::new(Duration::from_millis(100));
        let (tx, rx) = mpsc::channel();

        debouncer.submit("ap".to_string(), engine.clone(), tx.clone());
        thread::sleep(Duration::from_millis(10));
        debouncer.submit("app".to_string(), engine.clone(), tx.clone());
        thread::sleep(Duration::from_millis(10));
        debouncer.submit("apple".to_string(), engine.clone(), tx.clone());

        let response = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("debounced query never delivered");
        assert_eq!(response.query, "apple");

        // nothing else arrives: earlier submissions were superseded
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        // and exactly one search actually executed
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debounce_separate_windows_both_execute() {
        let embedder = NullEmbedder::new();
        let engine = engine_over(
            IndexSchema::Lexical,
            vec![("n1", "apple orchard visit")],
            embedder.clone(),
        );

        let debouncer = Debouncer::new(Duration::from_millis(30));
        let (tx, rx) = mpsc::channel();

        debouncer.submit("apple".to_string(), engine.clone(), tx.clone());
        thread::sleep(Duration::from_millis(120));
        debouncer.submit("orchard".to_string(), engine.clone(), tx.clone());

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.query, "apple");
        assert_eq!(second.query, "orchard");
        assert!(first.token < second.token);
    }
}
