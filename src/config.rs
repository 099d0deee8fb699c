use crate::classify::ModelTier;
use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

const TASK_QUEUE_MAX_THREADS: u16 = 4;
const TASK_QUEUE_MAX_RETRIES: u8 = 2;

const DEFAULT_CLASSIFIER_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_FLASH_MODEL: &str = "gemini-3-flash-preview";
const DEFAULT_PRO_MODEL: &str = "gemini-3-pro-preview";
const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 30;

/// Default embedding model; 384-dimension output is required by the index schema.
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_SEARCH_LIMIT: usize = 20;
/// Minimum cosine similarity for a vector match to count at all.
const DEFAULT_MIN_SIMILARITY: f32 = 0.6;
/// Semantic share of the rank fusion; the rest goes to keyword ranking.
const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.6;

/// Configuration for the remote classification service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,

    /// Model used on the fast/cheap tier.
    #[serde(default = "default_flash_model")]
    pub flash_model: String,

    /// Model used on the quality tier.
    #[serde(default = "default_pro_model")]
    pub pro_model: String,

    #[serde(default)]
    pub tier: ModelTier,

    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CLASSIFIER_ENDPOINT.to_string(),
            flash_model: DEFAULT_FLASH_MODEL.to_string(),
            pro_model: DEFAULT_PRO_MODEL.to_string(),
            tier: ModelTier::default(),
            timeout_secs: DEFAULT_CLASSIFIER_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Idle window before a query actually executes; new input resets it.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_search_limit")]
    pub limit: usize,

    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            limit: DEFAULT_SEARCH_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
        }
    }
}

fn default_classifier_endpoint() -> String {
    DEFAULT_CLASSIFIER_ENDPOINT.to_string()
}

fn default_flash_model() -> String {
    DEFAULT_FLASH_MODEL.to_string()
}

fn default_pro_model() -> String {
    DEFAULT_PRO_MODEL.to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    DEFAULT_CLASSIFIER_TIMEOUT_SECS
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_semantic_weight() -> f32 {
    DEFAULT_SEMANTIC_WEIGHT
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "task_queue_max_threads")]
    pub task_queue_max_threads: u16,
    #[serde(default = "task_queue_max_retries")]
    pub task_queue_max_retries: u8,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_queue_max_threads: TASK_QUEUE_MAX_THREADS,
            task_queue_max_retries: TASK_QUEUE_MAX_RETRIES,
            classifier: ClassifierConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            base_path: String::new(),
        }
    }
}

fn task_queue_max_threads() -> u16 {
    TASK_QUEUE_MAX_THREADS
}

fn task_queue_max_retries() -> u8 {
    TASK_QUEUE_MAX_RETRIES
}

/// Resolve the data directory: `NOTEFORGE_BASE_PATH` wins, otherwise
/// `~/.local/share/noteforge`.
pub fn default_base_path() -> String {
    std::env::var("NOTEFORGE_BASE_PATH").unwrap_or(format!(
        "{}/.local/share/noteforge",
        homedir::my_home()
            .expect("couldnt find home dir")
            .expect("couldnt find home dir")
            .to_string_lossy()
    ))
}

impl Config {
    fn validate(&mut self) {
        if self.task_queue_max_threads == 0 {
            self.task_queue_max_threads = 1
        }

        if !(0.0..=1.0).contains(&self.search.min_similarity) {
            panic!(
                "search.min_similarity must be between 0.0 and 1.0, got {}",
                self.search.min_similarity
            );
        }

        if !(0.0..=1.0).contains(&self.search.semantic_weight) {
            panic!(
                "search.semantic_weight must be between 0.0 and 1.0, got {}",
                self.search.semantic_weight
            );
        }

        if self.search.limit == 0 {
            panic!("search.limit must be greater than 0");
        }

        if self.embedding.download_timeout_secs == 0 {
            panic!("embedding.download_timeout_secs must be greater than 0");
        }

        if self.classifier.timeout_secs == 0 {
            panic!("classifier.timeout_secs must be greater than 0");
        }
    }

    pub fn load() -> Self {
        Self::load_with(&default_base_path())
    }

    pub fn load_with(base_path: &str) -> Self {
        let store = storage::BackendLocal::new(base_path).expect("couldnt create data dir");

        // create new if does not exist
        if !store.exists("config.yaml") {
            store
                .write(
                    "config.yaml",
                    serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
                )
                .expect("couldnt write default config");
        }

        let config_str =
            String::from_utf8(store.read("config.yaml").expect("couldnt read config"))
                .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store =
            storage::BackendLocal::new(&self.base_path).expect("couldnt create data dir");

        let config_str = serde_yml::to_string(&self).unwrap();
        if let Err(err) = store.write("config.yaml", config_str.as_bytes()) {
            log::error!("failed to save config: {err}");
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.task_queue_max_threads, 4);
        assert_eq!(config.search.debounce_ms, 300);
        assert_eq!(config.search.limit, 20);
        assert!((config.search.min_similarity - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(config.classifier.tier, ModelTier::Flash);
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_string_lossy().to_string();

        let config = Config::load_with(&base);
        assert_eq!(config.base_path(), base);

        // second load reads the file written by the first
        let reloaded = Config::load_with(&base);
        assert_eq!(reloaded.search.limit, config.search.limit);
    }

    #[test]
    #[should_panic(expected = "min_similarity")]
    fn test_invalid_similarity_rejected() {
        let mut config = Config::default();
        config.search = SearchConfig::default();
        config.search.min_similarity = 1.5;
        config.validate();
    }
}
