use crate::classify::{ClassifierProvider, ClassifyError, NoteMetadata, MAX_TAGS, TAG_LIBRARY};
use crate::config::Config;
use crate::notes::{Category, EventDetails, Intent};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const CLASSIFY_SYSTEM_INSTRUCTION: &str = "You are an automated Knowledge Engine Librarian. \
Analyze the note and provide metadata using ONLY the provided TAG LIBRARY.\n\
RULES:\n\
- Category: Functional category (Character, Lore, Tech, Transit, Mission, or Personal).\n\
- Headline: MAX 5 words.\n\
- Tags: 3-5 tags from TAG LIBRARY.\n\
- Intent: task, reference or ephemeral.\n\
- calendarSync true plus eventDetails only when the note describes a dated event.\n\
OUTPUT FORMAT: JSON ONLY.";

const REFORMAT_SYSTEM_INSTRUCTION: &str = "Reformat notes in authoritative, concise \
encyclopedic style. No markdown, single paragraph. AUTHORITATIVE tone.";

/// Remote classifier speaking the `generateContent` JSON-schema dialect.
///
/// Reads the classifier section of the shared config at call time, so a tier
/// switch takes effect without rebuilding the provider.
pub struct GeminiClassifier {
    client: reqwest::blocking::Client,
    config: Arc<RwLock<Config>>,
}

impl GeminiClassifier {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        let timeout = config.read().unwrap().classifier.timeout_secs;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .expect("reqwest client construction is infallible with static options");

        Self { client, config }
    }

    fn api_key() -> Result<String, ClassifyError> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(ClassifyError::MissingApiKey(API_KEY_ENV)),
        }
    }

    fn request_url(&self) -> String {
        let config = self.config.read().unwrap();
        let model = match config.classifier.tier {
            crate::classify::ModelTier::Pro => &config.classifier.pro_model,
            crate::classify::ModelTier::Flash => &config.classifier.flash_model,
        };
        format!(
            "{}/v1beta/models/{}:generateContent",
            config.classifier.endpoint.trim_end_matches('/'),
            model
        )
    }

    fn user_parts(content: &str, rag_context: Option<&str>) -> Vec<Value> {
        let mut parts = vec![];
        if let Some(context) = rag_context {
            parts.push(json!({
                "text": format!("REFERENCE DOCUMENT (Reference Manual):\n{context}")
            }));
            parts.push(json!({
                "text": "Analyze the USER NOTE in the context of the attached reference document."
            }));
        } else {
            parts.push(json!({ "text": "Analyze the USER NOTE." }));
        }
        parts.push(json!({ "text": format!("TAG LIBRARY: {TAG_LIBRARY}") }));
        parts.push(json!({ "text": format!("USER NOTE: \"{content}\"") }));
        parts
    }

    fn classify_body(content: &str, rag_context: Option<&str>) -> Value {
        json!({
            "contents": [{ "parts": Self::user_parts(content, rag_context) }],
            "systemInstruction": { "parts": [{ "text": CLASSIFY_SYSTEM_INSTRUCTION }] },
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "category": { "type": "STRING" },
                        "headline": { "type": "STRING" },
                        "tags": { "type": "ARRAY", "items": { "type": "STRING" } },
                        "intent": { "type": "STRING" },
                        "calendarSync": { "type": "BOOLEAN" },
                        "eventDetails": {
                            "type": "OBJECT",
                            "properties": {
                                "title": { "type": "STRING" },
                                "date": { "type": "STRING" },
                                "time": { "type": "STRING" },
                                "location": { "type": "STRING" }
                            }
                        }
                    },
                    "required": ["category", "headline", "tags", "intent"]
                }
            }
        })
    }

    fn reformat_body(content: &str, rag_context: Option<&str>) -> Value {
        let mut parts = vec![];
        if let Some(context) = rag_context {
            parts.push(json!({
                "text": format!("Use the following as the authoritative source:\n{context}")
            }));
        }
        parts.push(json!({ "text": format!("ORIGINAL NOTE: \"{content}\"") }));

        json!({
            "contents": [{ "parts": parts }],
            "systemInstruction": { "parts": [{ "text": REFORMAT_SYSTEM_INSTRUCTION }] },
        })
    }

    fn post(&self, body: &Value) -> Result<Value, ClassifyError> {
        let key = Self::api_key()?;
        let resp = self
            .client
            .post(self.request_url())
            .header("x-goog-api-key", key)
            .json(body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(ClassifyError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json::<Value>()?)
    }

    /// Pull the model's text payload out of a `generateContent` response.
    fn response_text(resp: &Value) -> Result<&str, ClassifyError> {
        resp.get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .and_then(|p| p.first())
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                ClassifyError::MalformedResponse("no text candidate in response".to_string())
            })
    }

    fn extract_metadata(raw: &Value) -> Result<NoteMetadata, ClassifyError> {
        if !raw.is_object() {
            return Err(ClassifyError::MalformedResponse(
                "classification payload is not an object".to_string(),
            ));
        }

        let category = raw
            .get("category")
            .and_then(|v| v.as_str())
            .map(Category::parse)
            .unwrap_or_default();

        let headline = raw
            .get("headline")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("New Entry")
            .to_string();

        let tags = raw
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str())
                    .map(str::to_owned)
                    .take(MAX_TAGS)
                    .collect()
            })
            .unwrap_or_default();

        let intent = raw
            .get("intent")
            .and_then(|v| v.as_str())
            .map(Intent::parse)
            .unwrap_or_default();

        let calendar_sync = raw
            .get("calendarSync")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let event_details = raw
            .get("eventDetails")
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value::<EventDetails>(v.clone()).ok())
            .filter(|ev| !ev.title.is_empty() || !ev.date.is_empty());

        Ok(NoteMetadata {
            category,
            headline,
            tags,
            intent,
            calendar_sync,
            event_details,
        })
    }
}

impl ClassifierProvider for GeminiClassifier {
    fn classify(
        &self,
        content: &str,
        rag_context: Option<&str>,
    ) -> Result<NoteMetadata, ClassifyError> {
        let resp = self.post(&Self::classify_body(content, rag_context))?;
        let text = Self::response_text(&resp)?;

        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))?;

        Self::extract_metadata(&parsed)
    }

    fn reformat(
        &self,
        content: &str,
        rag_context: Option<&str>,
    ) -> Result<String, ClassifyError> {
        let resp = self.post(&Self::reformat_body(content, rag_context))?;
        let text = Self::response_text(&resp)?.trim();

        if text.is_empty() {
            return Err(ClassifyError::MalformedResponse(
                "empty reformat result".to_string(),
            ));
        }

        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_full_response() {
        let raw = json!({
            "category": "Tech",
            "headline": "Relay Uplink Notes",
            "tags": ["Tech", "Research", "Ideas"],
            "intent": "reference",
            "calendarSync": true,
            "eventDetails": { "title": "Uplink test", "date": "2026-08-12", "time": "14:00" }
        });

        let meta = GeminiClassifier::extract_metadata(&raw).unwrap();
        assert_eq!(meta.category, Category::Tech);
        assert_eq!(meta.headline, "Relay Uplink Notes");
        assert_eq!(meta.tags.len(), 3);
        assert_eq!(meta.intent, Intent::Reference);
        assert!(meta.calendar_sync);
        let event = meta.event_details.unwrap();
        assert_eq!(event.date, "2026-08-12");
        assert_eq!(event.time.as_deref(), Some("14:00"));
    }

    #[test]
    fn test_extract_missing_fields_fall_back() {
        let raw = json!({ "category": "Galactic" });

        let meta = GeminiClassifier::extract_metadata(&raw).unwrap();
        assert_eq!(meta.category, Category::Thoughts);
        assert_eq!(meta.headline, "New Entry");
        assert!(meta.tags.is_empty());
        assert_eq!(meta.intent, Intent::Reference);
        assert!(!meta.calendar_sync);
        assert!(meta.event_details.is_none());
    }

    #[test]
    fn test_extract_non_object_rejected() {
        let raw = json!("just a string");
        let result = GeminiClassifier::extract_metadata(&raw);
        assert!(matches!(result, Err(ClassifyError::MalformedResponse(_))));
    }

    #[test]
    fn test_extract_caps_tags() {
        let raw = json!({
            "category": "Personal",
            "headline": "Tag Flood",
            "tags": ["a", "b", "c", "d", "e", "f", "g"],
            "intent": "task"
        });

        let meta = GeminiClassifier::extract_metadata(&raw).unwrap();
        assert_eq!(meta.tags.len(), MAX_TAGS);
        assert_eq!(meta.intent, Intent::Task);
    }

    #[test]
    fn test_response_text_extraction() {
        let resp = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"category\":\"Lore\"}" }] }
            }]
        });
        assert_eq!(
            GeminiClassifier::response_text(&resp).unwrap(),
            "{\"category\":\"Lore\"}"
        );

        let empty = json!({ "candidates": [] });
        assert!(GeminiClassifier::response_text(&empty).is_err());
    }

    #[test]
    fn test_request_url_follows_tier() {
        let config = Arc::new(RwLock::new(Config::default()));
        let classifier = GeminiClassifier::new(config.clone());

        assert!(classifier.request_url().contains("flash"));
        config.write().unwrap().classifier.tier = crate::classify::ModelTier::Pro;
        assert!(classifier.request_url().contains("pro"));
    }
}
