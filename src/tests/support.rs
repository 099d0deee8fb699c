//! Shared test doubles: a scripted classifier and deterministic embedders.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::app::App;
use crate::classify::{ClassifierProvider, ClassifyError, NoteMetadata};
use crate::config::Config;
use crate::notes::{BackendJson, Category, Intent, NoteManager};
use crate::search::{EmbeddingProvider, EMBEDDING_DIMENSIONS};
use crate::storage::{BackendLocal, StorageManager};

/// Scripted classifier that records call pressure.
pub struct MockClassifier {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: AtomicBool,
    /// When set, only content containing this marker fails.
    fail_marker: RwLock<Option<String>>,
    delay: RwLock<Option<Duration>>,
}

impl MockClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            fail_marker: RwLock::new(None),
            delay: RwLock::new(None),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_marker(&self, marker: &str) {
        *self.fail_marker.write().unwrap() = Some(marker.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, content: &str) -> bool {
        if self.fail.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_marker
            .read()
            .unwrap()
            .as_ref()
            .map(|marker| content.contains(marker.as_str()))
            .unwrap_or(false)
    }
}

impl ClassifierProvider for MockClassifier {
    fn classify(
        &self,
        content: &str,
        _rag_context: Option<&str>,
    ) -> Result<NoteMetadata, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = *self.delay.read().unwrap() {
            std::thread::sleep(delay);
        }

        let result = if self.should_fail(content) {
            // 400 so the task queue treats it as non-retryable
            Err(ClassifyError::Remote {
                status: 400,
                message: "scripted failure".to_string(),
            })
        } else {
            let first_word = content.split_whitespace().next().unwrap_or("nothing");
            Ok(NoteMetadata {
                category: Category::Tech,
                headline: format!("About {first_word}"),
                tags: vec!["Research".to_string(), "Ideas".to_string()],
                intent: Intent::Reference,
                calendar_sync: false,
                event_details: None,
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn reformat(
        &self,
        content: &str,
        _rag_context: Option<&str>,
    ) -> Result<String, ClassifyError> {
        if self.should_fail(content) {
            return Err(ClassifyError::Remote {
                status: 400,
                message: "scripted failure".to_string(),
            });
        }
        Ok(format!("{content} (encyclopedic)"))
    }
}

/// Deterministic pseudo-random unit-range vectors: the same text always
/// embeds to the same vector, different texts to near-orthogonal ones.
pub struct HashEmbedder;

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.trim().as_bytes() {
            state = (state ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3);
        }

        let mut vector = Vec::with_capacity(EMBEDDING_DIMENSIONS);
        for _ in 0..EMBEDDING_DIMENSIONS {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let unit = (state >> 33) as f32 / (1u64 << 31) as f32;
            vector.push(unit * 2.0 - 1.0);
        }
        Some(vector)
    }
}

/// Embedding model that never produces anything.
pub struct NullEmbedder {
    calls: AtomicUsize,
}

impl NullEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for NullEmbedder {
    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Embedder that can be switched off mid-test.
pub struct ToggleEmbedder {
    enabled: AtomicBool,
    inner: HashEmbedder,
}

impl ToggleEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            inner: HashEmbedder,
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl EmbeddingProvider for ToggleEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if self.enabled.load(Ordering::SeqCst) {
            self.inner.embed(text)
        } else {
            None
        }
    }
}

pub fn build_app(
    dir: &tempfile::TempDir,
    classifier: Arc<dyn ClassifierProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> App {
    let base = dir.path().to_string_lossy().to_string();
    let config = Arc::new(RwLock::new(Config::load_with(&base)));

    let storage_mgr: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(&base).unwrap());
    let note_mgr: Arc<dyn NoteManager> = Arc::new(BackendJson::load(storage_mgr.clone()).unwrap());

    App::assemble(note_mgr, storage_mgr, classifier, embedder, config)
}

/// Poll until `predicate` holds or the timeout elapses.
pub fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}
