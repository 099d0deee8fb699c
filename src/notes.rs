use crate::nid::NoteId;
use crate::search::EMBEDDING_DIMENSIONS;
use crate::storage::StorageManager;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::Display,
    hash::Hash,
    sync::{Arc, RwLock},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// Headline shown while a note is waiting for classification.
pub const PLACEHOLDER_HEADLINE: &str = "Analyzing...";

const SNAPSHOT_FILE: &str = "notes.json";

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

/// Closed category vocabulary. Anything the classifier (or an imported file)
/// produces outside this set collapses into [`Category::Thoughts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Category {
    Character,
    Lore,
    Tech,
    Transit,
    Mission,
    Personal,
    #[default]
    #[serde(other)]
    Thoughts,
}

impl Category {
    pub fn parse(raw: &str) -> Category {
        match raw.trim().to_lowercase().as_str() {
            "character" => Category::Character,
            "lore" => Category::Lore,
            "tech" => Category::Tech,
            "transit" => Category::Transit,
            "mission" => Category::Mission,
            "personal" => Category::Personal,
            _ => Category::Thoughts,
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Character => "Character",
            Category::Lore => "Lore",
            Category::Tech => "Tech",
            Category::Transit => "Transit",
            Category::Mission => "Mission",
            Category::Personal => "Personal",
            Category::Thoughts => "Thoughts",
        };
        write!(f, "{name}")
    }
}

/// Routing hint for the export sinks; produced by the same classification
/// call as the display metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Task,
    Ephemeral,
    #[default]
    #[serde(other)]
    Reference,
}

impl Intent {
    pub fn parse(raw: &str) -> Intent {
        match raw.trim().to_lowercase().as_str() {
            "task" => Intent::Task,
            "ephemeral" => Intent::Ephemeral,
            _ => Intent::Reference,
        }
    }
}

impl Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Intent::Task => "task",
            Intent::Ephemeral => "ephemeral",
            Intent::Reference => "reference",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub title: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// The central entity. Serialized with camelCase names so import/export
/// round-trips files produced by other frontends of the same format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub ai_status: AiStatus,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub rag_enabled: bool,
    #[serde(default)]
    pub calendar_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_details: Option<EventDetails>,
}

impl Hash for Note {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// identity is the id alone, so equality is total
impl Eq for Note {}

#[derive(Debug, Clone, Default)]
pub struct NoteCreate {
    pub content: String,
    pub rag_enabled: bool,
}

/// Field-level merge payload. `None` leaves the field untouched, so stale
/// in-flight enrichments and fresh edits interleave safely per id.
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub content: Option<String>,
    pub original_content: Option<String>,
    pub clear_original_content: bool,
    pub ai_status: Option<AiStatus>,
    pub category: Option<Category>,
    pub headline: Option<String>,
    pub tags: Option<Vec<String>>,
    pub intent: Option<Intent>,
    /// Merged only when well-formed; a valid embedding is never replaced
    /// with nothing.
    pub embedding: Option<Vec<f32>>,
    pub rag_enabled: Option<bool>,
    pub calendar_sync: Option<bool>,
    pub event_details: Option<EventDetails>,
}

pub trait NoteManager: Send + Sync {
    fn create(&self, create: NoteCreate) -> anyhow::Result<Note>;
    fn update(&self, id: &NoteId, update: NoteUpdate) -> anyhow::Result<Option<Note>>;
    fn delete(&self, id: &NoteId) -> anyhow::Result<()>;
    fn import_many(&self, notes: Vec<Note>) -> anyhow::Result<usize>;
    fn snapshot(&self) -> Vec<Note>;
    fn get(&self, id: &NoteId) -> Option<Note>;
}

/// In-memory note collection persisted as a JSON snapshot after every
/// mutation. The in-memory state is authoritative for the running session;
/// snapshot write failures are logged, never rolled back.
#[derive(Clone)]
pub struct BackendJson {
    list: Arc<RwLock<Vec<Note>>>,
    store: Arc<dyn StorageManager>,
}

impl BackendJson {
    pub fn load(store: Arc<dyn StorageManager>) -> anyhow::Result<Self> {
        let notes = if store.exists(SNAPSHOT_FILE) {
            let now = Instant::now();
            let data = store.read(SNAPSHOT_FILE)?;
            let notes: Vec<Note> = serde_json::from_slice(&data)?;
            log::debug!(
                "loaded {} notes in {}ms",
                notes.len(),
                now.elapsed().as_micros() as f64 / 1000.0
            );
            notes
        } else {
            log::info!("creating new note collection");
            vec![]
        };

        let mgr = BackendJson {
            list: Arc::new(RwLock::new(notes)),
            store,
        };
        mgr.save();

        Ok(mgr)
    }

    pub fn save(&self) {
        let notes = self.list.read().unwrap();
        let data = serde_json::to_vec_pretty(&*notes).expect("notes are always serializable");
        drop(notes);

        if let Err(err) = self.store.write(SNAPSHOT_FILE, &data) {
            log::error!("failed to persist note snapshot: {err}");
        }
    }

    fn dedup_tags(tags: &mut Vec<String>) {
        let mut seen = HashSet::new();
        tags.retain(|item| seen.insert(item.clone()));
    }
}

impl NoteManager for BackendJson {
    fn create(&self, create: NoteCreate) -> anyhow::Result<Note> {
        let note = Note {
            id: NoteId::new(),
            content: create.content,
            original_content: None,
            timestamp: now_millis(),
            ai_status: AiStatus::Processing,
            category: Category::default(),
            headline: PLACEHOLDER_HEADLINE.to_string(),
            tags: vec![],
            intent: Intent::default(),
            embedding: None,
            rag_enabled: create.rag_enabled,
            calendar_sync: false,
            event_details: None,
        };

        // newest-first is the canonical collection order
        self.list.write().unwrap().insert(0, note.clone());

        self.save();

        Ok(note)
    }

    fn update(&self, id: &NoteId, update: NoteUpdate) -> anyhow::Result<Option<Note>> {
        let mut notes = self.list.write().unwrap();

        let Some(note) = notes.iter_mut().find(|n| &n.id == id) else {
            log::debug!("update for unknown note {id} ignored");
            return Ok(None);
        };

        if let Some(content) = update.content {
            note.content = content;
        }
        if let Some(original) = update.original_content {
            note.original_content = Some(original);
        }
        if update.clear_original_content {
            note.original_content = None;
        }
        if let Some(status) = update.ai_status {
            note.ai_status = status;
        }
        if let Some(category) = update.category {
            note.category = category;
        }
        if let Some(headline) = update.headline {
            note.headline = headline;
        }
        if let Some(mut tags) = update.tags {
            Self::dedup_tags(&mut tags);
            note.tags = tags;
        }
        if let Some(intent) = update.intent {
            note.intent = intent;
        }
        if let Some(embedding) = update.embedding {
            if embedding.len() == EMBEDDING_DIMENSIONS {
                note.embedding = Some(embedding);
            } else {
                log::warn!(
                    "discarding malformed embedding for note {id}: {} components, expected {}",
                    embedding.len(),
                    EMBEDDING_DIMENSIONS
                );
            }
        }
        if let Some(rag_enabled) = update.rag_enabled {
            note.rag_enabled = rag_enabled;
        }
        if let Some(calendar_sync) = update.calendar_sync {
            note.calendar_sync = calendar_sync;
        }
        if let Some(event_details) = update.event_details {
            note.event_details = Some(event_details);
        }

        let result = note.clone();
        drop(notes);

        self.save();

        Ok(Some(result))
    }

    fn delete(&self, id: &NoteId) -> anyhow::Result<()> {
        let mut notes = self.list.write().unwrap();
        let removed = notes.iter().position(|n| &n.id == id).map(|idx| {
            notes.remove(idx);
        });

        drop(notes);

        if removed.is_some() {
            self.save();
        }

        Ok(())
    }

    fn import_many(&self, imported: Vec<Note>) -> anyhow::Result<usize> {
        let mut notes = self.list.write().unwrap();
        let mut existing: HashSet<NoteId> = notes.iter().map(|n| n.id.clone()).collect();

        let mut fresh = vec![];
        for note in imported {
            if existing.insert(note.id.clone()) {
                fresh.push(note);
            }
        }

        let count = fresh.len();
        // imported notes land in front of the current collection, keeping
        // their own relative order
        fresh.extend(notes.drain(..));
        *notes = fresh;

        drop(notes);

        self.save();

        Ok(count)
    }

    fn snapshot(&self) -> Vec<Note> {
        self.list.read().unwrap().clone()
    }

    fn get(&self, id: &NoteId) -> Option<Note> {
        self.list.read().unwrap().iter().find(|n| &n.id == id).cloned()
    }
}
