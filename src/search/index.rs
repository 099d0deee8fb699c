//! In-memory search index over note documents.
//!
//! The index is derived state: it can always be regenerated from the note
//! store, and it is the only component the query engine reads. Documents
//! carry an explicit tagged schema (keyword fields plus an optional
//! fixed-width vector); inserts validate against it. Duplicate-id inserts
//! are rejected so the synchronizer can treat re-insertion as an idempotent
//! upsert.

use std::collections::HashMap;

use crate::nid::NoteId;
use crate::notes::Note;
use crate::search::hybrid;
use crate::search::lexical::{self, DocFields, FieldBoosts};
use crate::search::EMBEDDING_DIMENSIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSchema {
    /// Keyword fields plus a fixed-width embedding vector.
    Hybrid { dimensions: usize },
    /// Keyword fields only; vector queries are rejected.
    Lexical,
}

/// A document as stored in the index. Flat strings only; the enum fields of
/// a note are rendered before indexing.
#[derive(Debug, Clone)]
pub struct IndexDoc {
    pub content: String,
    pub headline: String,
    pub category: String,
    pub tags: Vec<String>,
    pub intent: String,
    pub embedding: Option<Vec<f32>>,
}

impl IndexDoc {
    pub fn from_note(note: &Note) -> IndexDoc {
        IndexDoc {
            content: note.content.clone(),
            headline: note.headline.clone(),
            category: note.category.to_string(),
            tags: note.tags.clone(),
            intent: note.intent.to_string(),
            embedding: note.embedding.clone(),
        }
    }

    fn fields(&self) -> DocFields<'_> {
        DocFields {
            content: &self.content,
            headline: &self.headline,
            category: &self.category,
            tags: &self.tags,
            intent: &self.intent,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("document {0} already indexed")]
    DuplicateId(NoteId),

    #[error("schema requires {expected}-dimension vectors, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector search unsupported by keyword-only schema")]
    VectorUnsupported,

    #[error("cannot search with a zero-norm query vector")]
    ZeroNormVector,
}

/// Vector half of a hybrid request.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub value: Vec<f32>,
    /// Minimum cosine similarity for a match to count.
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub term: String,
    pub limit: usize,
    pub boosts: FieldBoosts,
    pub semantic_weight: f32,
    pub vector: Option<VectorQuery>,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub id: NoteId,
    pub score: f32,
}

pub struct SearchIndex {
    schema: IndexSchema,
    docs: HashMap<NoteId, IndexDoc>,
}

impl SearchIndex {
    pub fn new(schema: IndexSchema) -> Result<Self, IndexError> {
        if let IndexSchema::Hybrid { dimensions } = schema {
            if dimensions != EMBEDDING_DIMENSIONS {
                return Err(IndexError::DimensionMismatch {
                    expected: EMBEDDING_DIMENSIONS,
                    got: dimensions,
                });
            }
        }

        Ok(Self {
            schema,
            docs: HashMap::new(),
        })
    }

    pub fn schema(&self) -> IndexSchema {
        self.schema
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, id: &NoteId) -> bool {
        self.docs.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NoteId> {
        self.docs.keys()
    }

    /// Insert a document. Fails on a duplicate id; a malformed vector is
    /// coerced to absent rather than failing the whole document.
    pub fn insert(&mut self, id: NoteId, mut doc: IndexDoc) -> Result<(), IndexError> {
        if self.docs.contains_key(&id) {
            return Err(IndexError::DuplicateId(id));
        }

        match self.schema {
            IndexSchema::Lexical => doc.embedding = None,
            IndexSchema::Hybrid { dimensions } => {
                if let Some(ref vector) = doc.embedding {
                    if vector.len() != dimensions || l2_norm(vector) < f32::EPSILON {
                        log::warn!(
                            "indexing {id} without its malformed embedding ({} components)",
                            vector.len()
                        );
                        doc.embedding = None;
                    }
                }
            }
        }

        self.docs.insert(id, doc);
        Ok(())
    }

    pub fn remove(&mut self, id: &NoteId) -> Option<IndexDoc> {
        self.docs.remove(id)
    }

    /// Execute a hybrid request: keyword ranking, optionally fused with a
    /// vector-similarity ranking when the request carries a query embedding.
    pub fn search(&self, req: &SearchRequest) -> Result<Vec<Hit>, IndexError> {
        let docs: Vec<(NoteId, DocFields)> = self
            .docs
            .iter()
            .map(|(id, doc)| (id.clone(), doc.fields()))
            .collect();

        let lexical_ids: Vec<NoteId> = lexical::score_lexical(&req.term, &req.boosts, &docs)
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut hits: Vec<Hit> = match &req.vector {
            None => lexical_ids
                .iter()
                .enumerate()
                .map(|(rank, id)| Hit {
                    id: id.clone(),
                    score: 1.0 / (rank as f32 + 1.0),
                })
                .collect(),
            Some(vector_query) => {
                let semantic_ids = self.vector_ranking(vector_query)?;
                hybrid::rrf_fusion(&semantic_ids, &lexical_ids, req.semantic_weight)
                    .into_iter()
                    .map(|r| Hit {
                        id: r.id,
                        score: r.score,
                    })
                    .collect()
            }
        };

        hits.truncate(req.limit);
        Ok(hits)
    }

    fn vector_ranking(&self, query: &VectorQuery) -> Result<Vec<NoteId>, IndexError> {
        let dimensions = match self.schema {
            IndexSchema::Hybrid { dimensions } => dimensions,
            IndexSchema::Lexical => return Err(IndexError::VectorUnsupported),
        };

        if query.value.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: query.value.len(),
            });
        }

        let query_norm = l2_norm(&query.value);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut scored: Vec<(NoteId, f32)> = self
            .docs
            .iter()
            .filter_map(|(id, doc)| {
                let embedding = doc.embedding.as_ref()?;
                let score = cosine_similarity(&query.value, embedding, query_norm);
                (score >= query.similarity).then(|| (id.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Assumes query_norm is precomputed for efficiency.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}
