//! Background enrichment pipeline.
//!
//! Tasks arrive on an mpsc queue and run on worker threads throttled by a
//! configured ceiling. Per-note failures become note state, never panics:
//! the classifier outcome decides between `completed` and `error`, and a
//! produced embedding commits regardless. Task statuses are dumped to
//! `task-queue.json` so interrupted work restarts on the next boot.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
        mpsc, Arc, RwLock,
    },
    thread::sleep,
    time::Duration,
};

use anyhow::anyhow;
use rand::random;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    classify::ClassifierProvider,
    config::Config,
    nid::NoteId,
    notes::{now_millis, AiStatus, NoteManager, NoteUpdate, PLACEHOLDER_HEADLINE},
    search::{EmbeddingProvider, IndexSynchronizer},
    storage::StorageManager,
};

const QUEUE_FILE: &str = "task-queue.json";

/// Name of the optional reference document consulted when a note has RAG
/// enabled.
pub const RAG_CONTEXT_FILE: &str = "context.md";

/// Global "AI unavailable" flag, flipped by the most recent classification
/// outcome and surfaced to the presentation layer.
pub struct AiHealth(AtomicBool);

impl AiHealth {
    pub fn new() -> Self {
        AiHealth(AtomicBool::new(true))
    }

    pub fn set_available(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn set_unavailable(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_available(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AiHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// `(current, total)` progress of a bulk refresh; `None` while idle.
pub struct RefreshProgress {
    current: AtomicUsize,
    total: AtomicUsize,
    active: AtomicBool,
}

impl RefreshProgress {
    pub fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            active: AtomicBool::new(false),
        }
    }

    pub fn begin(&self, total: usize) {
        self.current.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn bump(&self, current: usize) {
        self.current.store(current, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<(usize, usize)> {
        if !self.is_active() {
            return None;
        }
        Some((
            self.current.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        ))
    }
}

impl Default for RefreshProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a task needs; cloned into each worker thread.
#[derive(Clone)]
pub struct PipelineDeps {
    pub note_mgr: Arc<dyn NoteManager>,
    pub storage_mgr: Arc<dyn StorageManager>,
    pub classifier: Arc<dyn ClassifierProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub synchronizer: Arc<IndexSynchronizer>,
    pub config: Arc<RwLock<Config>>,
    pub ai_health: Arc<AiHealth>,
    pub refresh_progress: Arc<RefreshProgress>,
}

pub fn throttle(counter: Arc<AtomicU16>, config: Arc<RwLock<Config>>) {
    while counter.load(Ordering::Relaxed) >= config.read().unwrap().task_queue_max_threads {
        sleep(Duration::from_millis(100));
    }
}

pub fn start_queue(task_rx: mpsc::Receiver<Task>, deps: PipelineDeps) {
    let thread_ctr = Arc::new(AtomicU16::new(0));

    log::debug!("waiting for job");
    while let Ok(task) = task_rx.recv() {
        log::debug!("got the job");
        let deps = deps.clone();
        let thread_counter = thread_ctr.clone();

        // graceful shutdown
        if let Task::Shutdown = &task {
            while thread_counter.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(100));
            }
            return;
        };

        let id = save_task(&*deps.storage_mgr, task.clone(), Status::Pending);
        let task_handle = std::thread::spawn({
            let thread_counter = thread_counter.clone();
            let deps = deps.clone();
            let id = id.clone();
            move || {
                throttle(thread_counter.clone(), deps.config.clone());

                thread_counter.fetch_add(1, Ordering::Relaxed);
                set_status(&*deps.storage_mgr, &id, Status::InProgress);

                let max_retries = deps.config.read().unwrap().task_queue_max_retries;
                let mut attempt = 0u8;

                loop {
                    let status = task.run(&deps);

                    match &status {
                        Status::Error(msg) if attempt < max_retries && is_retryable_error(msg) => {
                            attempt += 1;
                            let delay_ms = 5000 * 2u64.pow(attempt as u32 - 1) + rand_jitter();
                            log::info!(
                                "task {}: retrying (attempt {}/{}) after error: {}, backoff {}ms",
                                id,
                                attempt,
                                max_retries,
                                msg,
                                delay_ms
                            );
                            set_attempt(&*deps.storage_mgr, &id, attempt);
                            set_status(&*deps.storage_mgr, &id, Status::Pending);
                            sleep(Duration::from_millis(delay_ms));
                        }
                        _ => {
                            set_status(&*deps.storage_mgr, &id, status);
                            break;
                        }
                    }
                }

                // remove task a bit later to give clients an opportunity to react
                let storage_mgr = deps.storage_mgr.clone();
                std::thread::spawn(move || {
                    sleep(Duration::from_secs(10));
                    remove_task(&*storage_mgr, &id);
                });
            }
        });

        // handle thread panics
        let storage_mgr = deps.storage_mgr.clone();
        std::thread::spawn(move || {
            if let Err(err) = task_handle.join() {
                log::error!("task_handle panicked: {err:?}");
                remove_task(&*storage_mgr, &id);
            }

            thread_counter.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

/// Load the reference document used as classification context, if present.
pub fn load_rag_context(store: &dyn StorageManager) -> Option<String> {
    if !store.exists(RAG_CONTEXT_FILE) {
        return None;
    }
    match store.read(RAG_CONTEXT_FILE) {
        Ok(data) => String::from_utf8(data).ok().filter(|s| !s.trim().is_empty()),
        Err(err) => {
            log::warn!("failed to read rag context: {err}");
            None
        }
    }
}

/// Enrich a single note: fix its content, flip it to `processing`, then run
/// classification and embedding concurrently and merge whatever each
/// produced. The classifier outcome alone decides the terminal status.
pub fn run_enrich(deps: &PipelineDeps, note_id: &NoteId) -> anyhow::Result<()> {
    let note = deps
        .note_mgr
        .get(note_id)
        .ok_or_else(|| anyhow!("note {note_id} not found"))?;

    // the content being enriched is fixed here; later edits win by merging
    // their own updates after this one
    let content = note.content.clone();
    let rag_context = if note.rag_enabled {
        load_rag_context(&*deps.storage_mgr)
    } else {
        None
    };

    // visible before any remote call starts
    deps.note_mgr.update(
        note_id,
        NoteUpdate {
            ai_status: Some(AiStatus::Processing),
            ..Default::default()
        },
    )?;

    let embed_handle = std::thread::spawn({
        let embedder = deps.embedder.clone();
        let content = content.clone();
        move || embedder.embed(&content)
    });

    let classified = deps.classifier.classify(&content, rag_context.as_deref());

    let embedding = embed_handle.join().unwrap_or_else(|err| {
        log::error!("embedding thread panicked: {err:?}");
        None
    });

    match classified {
        Ok(meta) => {
            deps.ai_health.set_available();

            let updated = deps.note_mgr.update(
                note_id,
                NoteUpdate {
                    category: Some(meta.category),
                    headline: Some(meta.headline),
                    tags: Some(meta.tags),
                    intent: Some(meta.intent),
                    calendar_sync: Some(meta.calendar_sync),
                    event_details: meta.event_details,
                    embedding,
                    ai_status: Some(AiStatus::Completed),
                    ..Default::default()
                },
            )?;

            if let Some(note) = updated {
                deps.synchronizer.upsert(&note);
            }

            Ok(())
        }
        Err(err) => {
            deps.ai_health.set_unavailable();

            // prior metadata stays; a fresh note gets a time-stamped headline
            // instead of the analyzing placeholder
            let headline = if note.headline == PLACEHOLDER_HEADLINE {
                Some(format!(
                    "Note {}",
                    chrono::Local::now().format("%H:%M:%S")
                ))
            } else {
                None
            };

            let updated = deps.note_mgr.update(
                note_id,
                NoteUpdate {
                    headline,
                    embedding,
                    ai_status: Some(AiStatus::Error),
                    ..Default::default()
                },
            )?;

            if let Some(note) = updated {
                deps.synchronizer.upsert(&note);
            }

            Err(err.into())
        }
    }
}

/// AI rewrite of the note content; the prior text is kept for a one-step
/// undo, then the rewritten content is fully re-enriched.
pub fn run_reformat(deps: &PipelineDeps, note_id: &NoteId) -> anyhow::Result<()> {
    let note = deps
        .note_mgr
        .get(note_id)
        .ok_or_else(|| anyhow!("note {note_id} not found"))?;

    let rag_context = if note.rag_enabled {
        load_rag_context(&*deps.storage_mgr)
    } else {
        None
    };

    deps.note_mgr.update(
        note_id,
        NoteUpdate {
            ai_status: Some(AiStatus::Processing),
            ..Default::default()
        },
    )?;

    match deps.classifier.reformat(&note.content, rag_context.as_deref()) {
        Ok(rewritten) => {
            if rewritten != note.content {
                deps.note_mgr.update(
                    note_id,
                    NoteUpdate {
                        content: Some(rewritten),
                        original_content: Some(note.content.clone()),
                        ..Default::default()
                    },
                )?;
            }
            run_enrich(deps, note_id)
        }
        Err(err) => {
            deps.ai_health.set_unavailable();
            deps.note_mgr.update(
                note_id,
                NoteUpdate {
                    ai_status: Some(AiStatus::Error),
                    ..Default::default()
                },
            )?;
            Err(err.into())
        }
    }
}

/// Re-enrich the whole collection, strictly one note at a time to bound the
/// remote request rate. Individual failures are tolerated; the pass always
/// ends with one full index rebuild.
pub fn run_refresh_all(deps: &PipelineDeps) -> anyhow::Result<()> {
    let notes = deps.note_mgr.snapshot();
    if notes.is_empty() {
        return Ok(());
    }

    deps.synchronizer.pause();
    deps.refresh_progress.begin(notes.len());

    for (i, note) in notes.iter().enumerate() {
        deps.refresh_progress.bump(i + 1);
        if let Err(err) = run_enrich(deps, &note.id) {
            log::warn!("refresh: note {} failed: {err}", note.id);
        }
    }

    let fresh = deps.note_mgr.snapshot();
    deps.synchronizer.resume();
    deps.synchronizer.rebuild(&fresh);
    deps.refresh_progress.finish();

    Ok(())
}

pub fn read_queue_dump(store: &dyn StorageManager) -> QueueDump {
    if store.exists(QUEUE_FILE) {
        match store.read(QUEUE_FILE) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::error!("queue dump is malformed: {e}");
                QueueDump {
                    queue: vec![],
                    now: now_millis(),
                }
            }),
            Err(e) => {
                log::error!("failed to read queue dump: {e}");
                QueueDump {
                    queue: vec![],
                    now: now_millis(),
                }
            }
        }
    } else {
        QueueDump {
            queue: vec![],
            now: now_millis(),
        }
    }
}

pub fn write_queue_dump(store: &dyn StorageManager, queue_dump: &QueueDump) {
    let queue_dump_str = serde_json::to_string_pretty(&queue_dump).unwrap();
    if let Err(e) = store.write(QUEUE_FILE, queue_dump_str.as_bytes()) {
        log::error!("failed to write queue dump: {e}");
    }
}

pub fn remove_task(store: &dyn StorageManager, id: &str) {
    let mut queue_dump = read_queue_dump(store);
    queue_dump.queue.retain(|td| td.id != id);
    queue_dump.now = now_millis();
    write_queue_dump(store, &queue_dump);
}

pub fn set_status(store: &dyn StorageManager, id: &str, status: Status) {
    let mut queue_dump = read_queue_dump(store);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.status = status;
    }

    queue_dump.now = now_millis();
    write_queue_dump(store, &queue_dump);
}

fn set_attempt(store: &dyn StorageManager, id: &str, attempt: u8) {
    let mut queue_dump = read_queue_dump(store);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.attempt = attempt;
    }
    queue_dump.now = now_millis();
    write_queue_dump(store, &queue_dump);
}

fn is_retryable_error(msg: &str) -> bool {
    let msg_lower = msg.to_lowercase();

    let retryable = msg_lower.contains("timeout")
        || msg_lower.contains("timed out")
        || msg_lower.contains("connection")
        || msg_lower.contains("reset by peer")
        || msg_lower.contains("500")
        || msg_lower.contains("502")
        || msg_lower.contains("503")
        || msg_lower.contains("504");

    // client errors are not retryable
    let is_client_error = msg_lower.contains("400")
        || msg_lower.contains("401")
        || msg_lower.contains("403")
        || msg_lower.contains("404")
        || msg_lower.contains("422")
        || msg_lower.contains("429");

    retryable && !is_client_error
}

fn rand_jitter() -> u64 {
    random::<u64>() % 2000
}

pub fn save_task(store: &dyn StorageManager, task: Task, status: Status) -> String {
    let id = Uuid::new_v4().to_string();

    let task_dump = TaskDump {
        id: id.clone(),
        task,
        status,
        attempt: 0,
    };

    let mut queue_dump = read_queue_dump(store);

    queue_dump.queue.push(task_dump);
    queue_dump.now = now_millis();
    write_queue_dump(store, &queue_dump);

    id
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Status {
    Interrupted,
    Pending,
    InProgress,
    Done,
    Error(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: String,
    pub task: Task,
    pub status: Status,
    #[serde(default)]
    pub attempt: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Task {
    /// request to (re-)enrich a single note
    Enrich { note_id: NoteId },

    /// request to AI-rewrite a note's content, then re-enrich it
    Reformat { note_id: NoteId },

    /// request to re-enrich the whole collection sequentially
    RefreshAll,

    /// request to gracefully shutdown task queue
    Shutdown,
}

impl Task {
    pub fn run(&self, deps: &PipelineDeps) -> Status {
        let result = match self {
            Task::Enrich { note_id } => run_enrich(deps, note_id),
            Task::Reformat { note_id } => run_reformat(deps, note_id),
            Task::RefreshAll => run_refresh_all(deps),
            Task::Shutdown => unreachable!(),
        };

        match result {
            Ok(()) => Status::Done,
            Err(err) => Status::Error(err.to_string()),
        }
    }
}
