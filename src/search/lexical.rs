//! Field-boosted keyword scoring for hybrid search.
//!
//! Headline matches outrank category matches, which outrank body matches.
//! Body hits are weighted inversely to content length so long notes don't
//! win on surface area alone.

use crate::nid::NoteId;

/// Per-field boost factors for keyword matches.
#[derive(Debug, Clone)]
pub struct FieldBoosts {
    pub headline: f32,
    pub category: f32,
    pub tags: f32,
    pub content: f32,
    pub intent: f32,
}

impl Default for FieldBoosts {
    fn default() -> Self {
        Self {
            headline: 2.0,
            category: 1.5,
            tags: 1.0,
            content: 1.0,
            intent: 1.0,
        }
    }
}

/// Lexical view of an indexed document.
#[derive(Debug, Clone, Copy)]
pub struct DocFields<'a> {
    pub content: &'a str,
    pub headline: &'a str,
    pub category: &'a str,
    pub tags: &'a [String],
    pub intent: &'a str,
}

/// Result of lexical scoring.
#[derive(Debug, Clone)]
pub struct LexicalResult {
    pub id: NoteId,
    /// Number of query terms matched
    pub matched_terms: usize,
    /// Boost-weighted score across all fields
    pub total_hits: f32,
}

/// Score documents against a query using keyword matching.
///
/// Returns only documents with at least one match, sorted by relevance
/// (matched_terms DESC, total_hits DESC).
pub fn score_lexical(
    query: &str,
    boosts: &FieldBoosts,
    docs: &[(NoteId, DocFields)],
) -> Vec<LexicalResult> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return vec![];
    }

    let mut results: Vec<LexicalResult> = docs
        .iter()
        .filter_map(|(id, fields)| {
            let (matched_terms, total_hits) = count_matches(&query_terms, boosts, fields);

            if matched_terms > 0 {
                Some(LexicalResult {
                    id: id.clone(),
                    matched_terms,
                    total_hits,
                })
            } else {
                None
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.matched_terms.cmp(&a.matched_terms).then_with(|| {
            b.total_hits
                .partial_cmp(&a.total_hits)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });

    results
}

/// Tokenize query into lowercase terms.
/// Filters out very short terms (1 char) and common stop words.
pub fn tokenize(query: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at",
        "to", "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so",
        "if", "then",
    ];

    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.len() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

/// Baseline content length for normalization (characters).
const CONTENT_LENGTH_BASELINE: f32 = 200.0;

/// Logarithmic length decay so a keyword buried in a long note scores below
/// the same keyword in a short focused one.
fn content_length_weight(len: usize) -> f32 {
    if len <= CONTENT_LENGTH_BASELINE as usize {
        return 1.0;
    }
    1.0 / (1.0 + (len as f32 / CONTENT_LENGTH_BASELINE).ln())
}

/// Count term matches across all document fields.
/// Returns (unique_terms_matched, boost-weighted score).
fn count_matches(
    query_terms: &[String],
    boosts: &FieldBoosts,
    fields: &DocFields,
) -> (usize, f32) {
    let headline_lower = fields.headline.to_lowercase();
    let category_lower = fields.category.to_lowercase();
    let content_lower = fields.content.to_lowercase();
    let intent_lower = fields.intent.to_lowercase();
    let tags_lower: Vec<String> = fields.tags.iter().map(|t| t.to_lowercase()).collect();

    let content_weight = content_length_weight(fields.content.len());

    let mut matched_terms = 0;
    let mut total_hits: f32 = 0.0;

    for term in query_terms {
        let mut term_hits: f32 = 0.0;

        if headline_lower.contains(term) {
            term_hits += boosts.headline;
        }

        if category_lower.contains(term) {
            term_hits += boosts.category;
        }

        for tag in &tags_lower {
            if tag == term {
                term_hits += boosts.tags;
            }
        }

        if content_lower.contains(term) {
            term_hits += boosts.content * content_weight;
        }

        if intent_lower == *term {
            term_hits += boosts.intent;
        }

        if term_hits > 0.0 {
            matched_terms += 1;
            total_hits += term_hits;
        }
    }

    (matched_terms, total_hits)
}
