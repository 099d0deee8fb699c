//! Note classification providers.
//!
//! A classifier turns raw note content into display metadata (category,
//! headline, tags), a routing intent and optional calendar details. The
//! remote backend lives in `gemini`; everything else in the crate talks to
//! the [`ClassifierProvider`] trait.

pub mod gemini;

pub use gemini::GeminiClassifier;

use crate::notes::{Category, EventDetails, Intent};
use serde::{Deserialize, Serialize};

/// Fixed tag vocabulary handed to the classifier; it must not invent tags
/// outside this list.
pub const TAG_LIBRARY: &str = "Work, Personal, Urgent, To-Do, Ideas, Goals, Project, Meeting, Finance, Health, Travel, Home, Shopping, Tech, Learning, Reference, Archive, Journal, Events, Family, Friends, Career, Education, Books, Movies, Music, Art, Design, Code, Marketing, Sales, Legal, Taxes, Bills, Recipes, Fitness, Meditation, Hobbies, Gaming, News, Politics, Science, History, Geography, Languages, DIY, Maintenance, Vehicles, Pets, Garden, Important, Later, Waiting, Research, Inspiration, Review, Draft, Final, Security";

/// Maximum number of tags kept from a classification response.
pub const MAX_TAGS: usize = 5;

/// Quality/cost tier of the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Flash,
    Pro,
}

impl ModelTier {
    pub fn parse(raw: &str) -> Option<ModelTier> {
        match raw.trim().to_lowercase().as_str() {
            "flash" => Some(ModelTier::Flash),
            "pro" => Some(ModelTier::Pro),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Flash => write!(f, "flash"),
            ModelTier::Pro => write!(f, "pro"),
        }
    }
}

/// Classifier output, already coerced into the closed vocabularies.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMetadata {
    pub category: Category,
    pub headline: String,
    pub tags: Vec<String>,
    pub intent: Intent,
    pub calendar_sync: bool,
    pub event_details: Option<EventDetails>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("{0} is not set")]
    MissingApiKey(&'static str),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Remote metadata classification. Implementations are expected to be slow
/// and fallible; callers convert failures into note state instead of
/// propagating them.
pub trait ClassifierProvider: Send + Sync {
    fn classify(
        &self,
        content: &str,
        rag_context: Option<&str>,
    ) -> Result<NoteMetadata, ClassifyError>;

    /// Rewrite note content in a concise encyclopedic register.
    fn reformat(&self, content: &str, rag_context: Option<&str>)
        -> Result<String, ClassifyError>;
}
