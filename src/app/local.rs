use std::{
    path::PathBuf,
    sync::{mpsc, Arc, RwLock},
    time::Duration,
};

use crate::{
    app::errors::AppError,
    app::task_runner::{self, AiHealth, PipelineDeps, RefreshProgress, Status, Task},
    classify::{ClassifierProvider, GeminiClassifier},
    config::Config,
    nid::NoteId,
    notes::{AiStatus, BackendJson, Note, NoteCreate, NoteManager, NoteUpdate},
    search::{
        query, Debouncer, EmbeddingProvider, FastembedProvider, IndexSynchronizer, QueryEngine,
        QueryOutcome, QueryResponse,
    },
    storage::{self, StorageManager},
};

/// Options for operations that trigger enrichment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichOpts {
    /// Hand the enrichment to the background queue instead of running it
    /// inline. The caller returns as soon as the optimistic store write
    /// lands; requires `run_queue` to have been called.
    pub async_enrich: bool,
}

pub struct App {
    note_mgr: Arc<dyn NoteManager>,
    storage_mgr: Arc<dyn StorageManager>,
    classifier: Arc<dyn ClassifierProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    synchronizer: Arc<IndexSynchronizer>,
    query_engine: Arc<QueryEngine>,
    debouncer: Debouncer,

    task_tx: Option<Arc<mpsc::Sender<Task>>>,
    task_queue_handle: Option<std::thread::JoinHandle<()>>,

    config: Arc<RwLock<Config>>,
    ai_health: Arc<AiHealth>,
    refresh_progress: Arc<RefreshProgress>,
}

impl App {
    pub fn new(config: Arc<RwLock<Config>>) -> anyhow::Result<Self> {
        let (base_path, embedding_config) = {
            let cfg = config.read().unwrap();
            (cfg.base_path().to_string(), cfg.embedding.clone())
        };

        let storage_mgr: Arc<dyn StorageManager> =
            Arc::new(storage::BackendLocal::new(&base_path)?);
        let note_mgr: Arc<dyn NoteManager> = Arc::new(BackendJson::load(storage_mgr.clone())?);
        let classifier: Arc<dyn ClassifierProvider> =
            Arc::new(GeminiClassifier::new(config.clone()));
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FastembedProvider::new(
            embedding_config,
            PathBuf::from(&base_path),
        ));

        Ok(Self::assemble(
            note_mgr,
            storage_mgr,
            classifier,
            embedder,
            config,
        ))
    }

    /// Wire an app from its parts. Tests use this to swap in mock providers.
    pub fn assemble(
        note_mgr: Arc<dyn NoteManager>,
        storage_mgr: Arc<dyn StorageManager>,
        classifier: Arc<dyn ClassifierProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        let synchronizer = Arc::new(IndexSynchronizer::new());
        // prime the index from the persisted collection
        synchronizer.sync_all(&note_mgr.snapshot());

        let search_config = config.read().unwrap().search.clone();
        let debounce_ms = search_config.debounce_ms;
        let query_engine = Arc::new(QueryEngine::new(
            synchronizer.handle(),
            embedder.clone(),
            search_config,
        ));

        Self {
            note_mgr,
            storage_mgr,
            classifier,
            embedder,
            synchronizer,
            query_engine,
            debouncer: Debouncer::new(Duration::from_millis(debounce_ms)),
            task_tx: None,
            task_queue_handle: None,
            config,
            ai_health: Arc::new(AiHealth::new()),
            refresh_progress: Arc::new(RefreshProgress::new()),
        }
    }

    pub fn pipeline_deps(&self) -> PipelineDeps {
        PipelineDeps {
            note_mgr: self.note_mgr.clone(),
            storage_mgr: self.storage_mgr.clone(),
            classifier: self.classifier.clone(),
            embedder: self.embedder.clone(),
            synchronizer: self.synchronizer.clone(),
            config: self.config.clone(),
            ai_health: self.ai_health.clone(),
            refresh_progress: self.refresh_progress.clone(),
        }
    }

    /// Start the background task queue and restart any work interrupted by
    /// the previous shutdown.
    pub fn run_queue(&mut self) {
        let (task_tx, task_rx) = mpsc::channel::<Task>();

        let handle = std::thread::spawn({
            let deps = self.pipeline_deps();

            let mut queue_dump = task_runner::read_queue_dump(&*deps.storage_mgr);
            let task_list = queue_dump.queue.clone();

            queue_dump.queue = Vec::new();
            task_runner::write_queue_dump(&*deps.storage_mgr, &queue_dump);

            std::thread::spawn({
                let task_tx = task_tx.clone();

                move || {
                    for task in task_list {
                        if let Status::Done = task.status {
                            continue;
                        }

                        log::info!("restarting interrupted task \"{:?}\"", task.task);
                        if let Err(err) = task_tx.send(task.task) {
                            log::error!("failed to initialize interrupted task: {err:?}");
                        }
                    }
                }
            });

            move || {
                task_runner::start_queue(task_rx, deps);
            }
        });

        self.task_queue_handle = Some(handle);
        self.task_tx = Some(Arc::new(task_tx));
    }

    /// Drain the queue and wait for in-flight tasks to settle.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.task_tx.take() {
            let _ = tx.send(Task::Shutdown);
        }
        if let Some(handle) = self.task_queue_handle.take() {
            let _ = handle.join();
        }
    }

    fn dispatch(&self, task: Task, async_enrich: bool) {
        let task = if async_enrich {
            if let Some(tx) = &self.task_tx {
                match tx.send(task) {
                    Ok(()) => return,
                    Err(err) => {
                        log::error!("task queue is gone, running inline");
                        err.0
                    }
                }
            } else {
                log::warn!("task queue not running, running inline");
                task
            }
        } else {
            task
        };

        let status = task.run(&self.pipeline_deps());
        if let Status::Error(msg) = status {
            log::warn!("enrichment failed: {msg}");
        }
    }

    /// Create a note. Returns as soon as the optimistic write lands; the
    /// note is already visible (and keyword-searchable) while enrichment is
    /// still in flight.
    pub fn create(&self, create: NoteCreate, opts: EnrichOpts) -> Result<Note, AppError> {
        let note = self.note_mgr.create(create)?;
        self.synchronizer.upsert(&note);

        self.dispatch(
            Task::Enrich {
                note_id: note.id.clone(),
            },
            opts.async_enrich,
        );

        Ok(self.note_mgr.get(&note.id).unwrap_or(note))
    }

    /// Replace a note's content and re-enrich it.
    pub fn edit(&self, id: &NoteId, content: String, opts: EnrichOpts) -> Result<Note, AppError> {
        // content and the processing flip land in one mutation, visible
        // before any enrichment work starts
        let note = self
            .note_mgr
            .update(
                id,
                NoteUpdate {
                    content: Some(content),
                    ai_status: Some(AiStatus::Processing),
                    ..Default::default()
                },
            )?
            .ok_or(AppError::NotFound)?;

        self.dispatch(
            Task::Enrich {
                note_id: note.id.clone(),
            },
            opts.async_enrich,
        );

        Ok(self.note_mgr.get(id).unwrap_or(note))
    }

    pub fn delete(&self, id: &NoteId) -> Result<(), AppError> {
        self.note_mgr.delete(id)?;
        self.synchronizer.remove(id);
        Ok(())
    }

    pub fn get(&self, id: &NoteId) -> Option<Note> {
        self.note_mgr.get(id)
    }

    pub fn snapshot(&self) -> Vec<Note> {
        self.note_mgr.snapshot()
    }

    /// AI rewrite of a note's content, keeping the prior text for `revert`.
    pub fn reformat(&self, id: &NoteId, opts: EnrichOpts) -> Result<(), AppError> {
        if self.note_mgr.get(id).is_none() {
            return Err(AppError::NotFound);
        }

        self.dispatch(
            Task::Reformat {
                note_id: id.clone(),
            },
            opts.async_enrich,
        );

        Ok(())
    }

    /// One-step undo of the last reformat. Restores the pre-reformat text
    /// without re-enriching; the existing metadata still describes it.
    pub fn revert(&self, id: &NoteId) -> Result<Note, AppError> {
        let note = self.note_mgr.get(id).ok_or(AppError::NotFound)?;
        let original = note.original_content.ok_or(AppError::NothingToRevert)?;

        let restored = self
            .note_mgr
            .update(
                id,
                NoteUpdate {
                    content: Some(original),
                    clear_original_content: true,
                    ..Default::default()
                },
            )?
            .ok_or(AppError::NotFound)?;

        Ok(restored)
    }

    /// Re-run enrichment for one note.
    pub fn refresh(&self, id: &NoteId, opts: EnrichOpts) -> Result<(), AppError> {
        if self.note_mgr.get(id).is_none() {
            return Err(AppError::NotFound);
        }

        self.dispatch(
            Task::Enrich {
                note_id: id.clone(),
            },
            opts.async_enrich,
        );

        Ok(())
    }

    /// Re-enrich the whole collection; see `task_runner::run_refresh_all`.
    pub fn refresh_all(&self, opts: EnrichOpts) -> Result<(), AppError> {
        self.dispatch(Task::RefreshAll, opts.async_enrich);
        Ok(())
    }

    /// Import a JSON array of notes. The file is validated wholesale: any
    /// malformed element rejects the entire import.
    pub fn import(&self, data: &[u8]) -> Result<usize, AppError> {
        let notes: Vec<Note> = serde_json::from_slice(data)
            .map_err(|e| AppError::MalformedImport(e.to_string()))?;

        let count = self.note_mgr.import_many(notes)?;
        self.synchronizer.sync_all(&self.note_mgr.snapshot());

        Ok(count)
    }

    pub fn export(&self) -> Result<Vec<u8>, AppError> {
        let snapshot = self.note_mgr.snapshot();
        serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| AppError::Other(anyhow::anyhow!("export serialization failed: {e}")))
    }

    /// One-shot search. Empty queries bypass the index entirely.
    pub fn search(&self, raw: &str) -> Vec<Note> {
        let outcome = self.query_engine.execute(raw);
        self.resolve_outcome(raw, outcome)
    }

    /// Debounced search for interactive input; results arrive on `sink`.
    pub fn search_debounced(&self, raw: String, sink: mpsc::Sender<QueryResponse>) {
        self.debouncer
            .submit(raw, self.query_engine.clone(), sink);
    }

    /// Map a query outcome back onto current store entries. Ranked ids that
    /// no longer exist (deleted since indexing) are silently dropped.
    pub fn resolve_outcome(&self, raw: &str, outcome: QueryOutcome) -> Vec<Note> {
        match outcome {
            QueryOutcome::All => self.note_mgr.snapshot(),
            QueryOutcome::Ranked(ids) => ids
                .into_iter()
                .filter_map(|id| self.note_mgr.get(&id))
                .collect(),
            QueryOutcome::Unavailable => {
                let snapshot = self.note_mgr.snapshot();
                let ids = query::substring_fallback(&snapshot, raw);
                ids.into_iter()
                    .filter_map(|id| snapshot.iter().find(|n| n.id == id).cloned())
                    .collect()
            }
        }
    }

    pub fn ai_available(&self) -> bool {
        self.ai_health.is_available()
    }

    pub fn refresh_progress(&self) -> Option<(usize, usize)> {
        self.refresh_progress.snapshot()
    }

    pub fn indexed_count(&self) -> usize {
        self.synchronizer.indexed_count()
    }

    pub fn set_model_tier(&self, tier: crate::classify::ModelTier) {
        let mut config = self.config.write().unwrap();
        config.classifier.tier = tier;
        config.save();
    }
}
