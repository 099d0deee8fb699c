//! Embedding provider backed by fastembed.
//!
//! The model is loaded lazily on first use: initialization is memoized
//! behind a mutex (concurrent callers wait on the same load instead of
//! racing their own) and retried a bounded number of times with exponential
//! backoff. Embedding is strictly best-effort: any failure, including a
//! wrong-width output, degrades to `None` and the note stays keyword-only.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread::sleep;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::search::EMBEDDING_DIMENSIONS;

/// Bounded retries for model initialization (initial attempt not counted).
const MAX_INIT_RETRIES: u32 = 2;
const INIT_BACKOFF_BASE_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("model initialization failed: {0}")]
    InitFailed(String),

    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("invalid model name: {0}")]
    InvalidModel(String),
}

/// Best-effort text embedding. Implementations never fail loudly; a `None`
/// simply excludes the text from vector matching.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

enum ModelState {
    Uninitialized,
    Ready(TextEmbedding),
    /// Retries exhausted; stays failed for the rest of the session.
    Failed,
}

pub struct FastembedProvider {
    state: Mutex<ModelState>,
    config: EmbeddingConfig,
    cache_dir: PathBuf,
}

impl FastembedProvider {
    /// No I/O happens here; the model loads on the first `embed` call.
    pub fn new(config: EmbeddingConfig, cache_dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(ModelState::Uninitialized),
            config,
            cache_dir,
        }
    }

    /// Only 384-dimension models are accepted; the index schema is fixed-width.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "unknown model: {}. Supported 384-dimension models: all-MiniLM-L6-v2, bge-small-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    fn try_init(&self) -> Result<TextEmbedding, EmbeddingError> {
        let model_enum = Self::parse_model_name(&self.config.model)?;

        let models_dir = self.cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(false);

        TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
    }

    fn init_with_retries(&self) -> Result<TextEmbedding, EmbeddingError> {
        let mut attempt = 0u32;
        loop {
            match self.try_init() {
                Ok(model) => return Ok(model),
                // bad model name never resolves itself, skip the retries
                Err(err @ EmbeddingError::InvalidModel(_)) => return Err(err),
                Err(err) if attempt < MAX_INIT_RETRIES => {
                    let delay_ms = INIT_BACKOFF_BASE_MS * 2u64.pow(attempt);
                    attempt += 1;
                    log::warn!(
                        "embedding model load failed (attempt {attempt}/{}): {err}, retrying in {delay_ms}ms",
                        MAX_INIT_RETRIES + 1
                    );
                    sleep(Duration::from_millis(delay_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn embed_inner(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut state = self.state.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("failed to acquire model lock: {}", e))
        })?;

        if let ModelState::Uninitialized = *state {
            match self.init_with_retries() {
                Ok(model) => {
                    log::info!("embedding model '{}' ready", self.config.model);
                    *state = ModelState::Ready(model);
                }
                Err(err) => {
                    log::error!("embedding model unavailable for this session: {err}");
                    *state = ModelState::Failed;
                    return Err(err);
                }
            }
        }

        let model = match *state {
            ModelState::Ready(ref mut model) => model,
            _ => {
                return Err(EmbeddingError::InitFailed(
                    "model previously failed to load".to_string(),
                ))
            }
        };

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding returned".to_string()))
    }
}

impl EmbeddingProvider for FastembedProvider {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match self.embed_inner(text) {
            Ok(vector) if vector.len() == EMBEDDING_DIMENSIONS => Some(vector),
            Ok(vector) => {
                log::warn!(
                    "discarding embedding with {} components, expected {}",
                    vector.len(),
                    EMBEDDING_DIMENSIONS
                );
                None
            }
            Err(err) => {
                log::debug!("embedding unavailable: {err}");
                None
            }
        }
    }
}
