//! External reply-suggestion service contract and HTTP client.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::SuggestionConfig;
use crate::defaults;
use crate::error::{ParleyError, Result};
use crate::pipeline::history::HistoryTurn;
use crate::pipeline::types::ReplySuggestion;
use crate::state::Settings;

/// Trait for the reply-suggestion stage.
///
/// An empty list is a valid outcome meaning the utterance did not warrant a
/// reply; it must not be conflated with failure.
#[async_trait]
pub trait SuggestionClient: Send + Sync {
    async fn suggest(
        &self,
        english_text: &str,
        settings: &Settings,
        detected_language: &str,
        history: &[HistoryTurn],
    ) -> Result<Vec<ReplySuggestion>>;
}

/// Full language names for the codes the translation service reports.
/// Unknown codes fall through as-is.
fn language_name(code: &str) -> &str {
    match code {
        "EN" => "English",
        "DE" => "German",
        "FR" => "French",
        "ES" => "Spanish",
        "IT" => "Italian",
        "NL" => "Dutch",
        "PL" => "Polish",
        "PT" => "Portuguese",
        "RU" => "Russian",
        "JA" => "Japanese",
        "ZH" => "Chinese",
        other => {
            if other.is_empty() {
                "unknown"
            } else {
                other
            }
        }
    }
}

/// Render the bounded history into prompt lines, one turn per line,
/// preferring translated text.
fn render_history(history: &[HistoryTurn]) -> String {
    let mut out = String::new();
    for turn in history {
        let text = turn.text_for_prompt().trim();
        if !text.is_empty() {
            out.push_str(&format!("{}: {}\n", turn.speaker, text));
        }
    }
    out
}

/// Assemble the persona/context instructions for the generation service.
fn build_system_prompt(settings: &Settings, detected_language: &str, history: &[HistoryTurn]) -> String {
    let user_name = settings.user_name();
    let language = language_name(detected_language);
    let respond_in_detected = settings.response_language() == "detected"
        && !detected_language.is_empty()
        && detected_language != "EN";

    let history_block = {
        let rendered = render_history(history);
        if rendered.is_empty() {
            String::new()
        } else {
            format!("\nPREVIOUS CONVERSATION TURNS (for context):\n{rendered}")
        }
    };

    let language_rule = if respond_in_detected {
        format!(
            "Responses should be in {language}: put the {language} text in the \
             \"original\" field and its English translation in the \"english\" field."
        )
    } else {
        "Responses should be in English; \"original\" and \"english\" carry the same text."
            .to_string()
    };

    format!(
        "You are {user_name}. Generate 2-3 distinct, natural things {user_name} could say \
         next in the conversation, replying to what the other person just said. Draw on the \
         USER CONTEXT, CONVERSATION CONTEXT, and previous turns; answer as {user_name}, not \
         as a generic assistant.\n\
         \n\
         USER CONTEXT:\n{personal}\n\
         \n\
         CONVERSATION CONTEXT:\n{context}\n\
         {history_block}\n\
         Only reply when the last thing said invites a response (a question, a personal \
         statement inviting engagement, or a continuation of an exchange). If it does not \
         (a bare acknowledgement, a statement with no conversational hook), return [].\n\
         \n\
         {language_rule}\n\
         Output ONLY a valid JSON list of 2-3 objects with keys 'original' and 'english'.",
        personal = settings.personal_info(),
        context = settings.conversation_context(),
    )
}

/// Extract suggestions from the raw model output.
///
/// Accepts a JSON list of `{original, english}` objects or a single bare
/// object (wrapped into a one-element list). Anything else is treated as
/// "no suggestions", not an error. At most three suggestions are kept.
fn parse_suggestions(content: &str) -> Vec<ReplySuggestion> {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return Vec::new();
    };

    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => return Vec::new(),
    };

    let mut suggestions = Vec::new();
    for item in items {
        let (Some(original), Some(english)) = (
            item.get("original").and_then(Value::as_str),
            item.get("english").and_then(Value::as_str),
        ) else {
            // One malformed entry invalidates the batch: the shape contract
            // was not met, so treat it as no suggestions.
            return Vec::new();
        };
        suggestions.push(ReplySuggestion {
            original: original.to_string(),
            english: english.to_string(),
        });
    }

    suggestions.truncate(defaults::MAX_SUGGESTIONS);
    suggestions
}

/// Reply suggestions over a chat-completions style HTTP API.
pub struct HttpSuggestionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpSuggestionClient {
    pub fn new(config: &SuggestionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl SuggestionClient for HttpSuggestionClient {
    async fn suggest(
        &self,
        english_text: &str,
        settings: &Settings,
        detected_language: &str,
        history: &[HistoryTurn],
    ) -> Result<Vec<ReplySuggestion>> {
        if english_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let system_prompt = build_system_prompt(settings, detected_language, history);
        let user_prompt = format!("What was said (English translation): \"{english_text}\"");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": user_prompt },
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
                "response_format": { "type": "json_object" },
            }))
            .send()
            .await
            .map_err(|e| ParleyError::Suggestion {
                message: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(ParleyError::Suggestion {
                message: format!("service returned {}", response.status()),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ParleyError::Suggestion {
                message: format!("invalid response body: {e}"),
            })?;

        let content = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("");

        // Empty or malformed content means "no reply warranted".
        Ok(parse_suggestions(content))
    }
}

/// Mock suggestion client for testing
#[derive(Debug, Clone)]
pub struct MockSuggestionClient {
    suggestions: Vec<ReplySuggestion>,
    should_fail: bool,
}

impl MockSuggestionClient {
    pub fn new() -> Self {
        Self {
            suggestions: Vec::new(),
            should_fail: false,
        }
    }

    /// Configure the mock to return specific suggestions
    pub fn with_suggestions(mut self, suggestions: Vec<ReplySuggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Configure the mock to fail on suggest
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Default for MockSuggestionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SuggestionClient for MockSuggestionClient {
    async fn suggest(
        &self,
        english_text: &str,
        _settings: &Settings,
        _detected_language: &str,
        _history: &[HistoryTurn],
    ) -> Result<Vec<ReplySuggestion>> {
        if english_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        if self.should_fail {
            return Err(ParleyError::Suggestion {
                message: "mock suggestion failure".to_string(),
            });
        }
        Ok(self.suggestions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(original: &str, english: &str) -> ReplySuggestion {
        ReplySuggestion {
            original: original.to_string(),
            english: english.to_string(),
        }
    }

    #[test]
    fn parse_list_of_suggestions() {
        let content = r#"[
            {"original": "Dove sei andato?", "english": "Where did you go?"},
            {"original": "Fantastico!", "english": "Fantastic!"}
        ]"#;
        let parsed = parse_suggestions(content);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].original, "Dove sei andato?");
        assert_eq!(parsed[1].english, "Fantastic!");
    }

    #[test]
    fn parse_bare_object_is_wrapped() {
        let content = r#"{"original": "Ciao!", "english": "Hi!"}"#;
        let parsed = parse_suggestions(content);
        assert_eq!(parsed, vec![suggestion("Ciao!", "Hi!")]);
    }

    #[test]
    fn parse_truncates_to_three() {
        let content = r#"[
            {"original": "a", "english": "a"},
            {"original": "b", "english": "b"},
            {"original": "c", "english": "c"},
            {"original": "d", "english": "d"}
        ]"#;
        assert_eq!(parse_suggestions(content).len(), 3);
    }

    #[test]
    fn parse_empty_list_is_valid() {
        assert!(parse_suggestions("[]").is_empty());
    }

    #[test]
    fn parse_junk_yields_no_suggestions() {
        assert!(parse_suggestions("not json").is_empty());
        assert!(parse_suggestions(r#""just a string""#).is_empty());
        assert!(parse_suggestions("42").is_empty());
        assert!(parse_suggestions(r#"[{"wrong": "keys"}]"#).is_empty());
    }

    #[test]
    fn language_names_cover_common_codes() {
        assert_eq!(language_name("IT"), "Italian");
        assert_eq!(language_name("EN"), "English");
        assert_eq!(language_name("XX"), "XX");
        assert_eq!(language_name(""), "unknown");
    }

    #[test]
    fn history_rendering_prefers_translations() {
        let mut turn_a = HistoryTurn::new("Friend", "Ciao, come stai?");
        turn_a.translated = "Hi, how are you?".to_string();
        let turn_b = HistoryTurn::new("Alex", "Sto bene!");

        let rendered = render_history(&[turn_a, turn_b]);
        assert_eq!(rendered, "Friend: Hi, how are you?\nAlex: Sto bene!\n");
    }

    #[test]
    fn system_prompt_includes_persona_and_history() {
        let settings = Settings::default();
        let history = vec![HistoryTurn::new("Friend", "Ciao")];
        let prompt = build_system_prompt(&settings, "IT", &history);

        assert!(prompt.contains("You are User."));
        assert!(prompt.contains("Casual conversation with a friend."));
        assert!(prompt.contains("Friend: Ciao"));
        assert!(prompt.contains("Responses should be in Italian"));
    }

    #[test]
    fn system_prompt_english_when_detected_is_english() {
        let settings = Settings::default();
        let prompt = build_system_prompt(&settings, "EN", &[]);
        assert!(prompt.contains("Responses should be in English"));
        assert!(!prompt.contains("PREVIOUS CONVERSATION TURNS"));
    }

    #[tokio::test]
    async fn mock_client_empty_input_returns_empty() {
        let client = MockSuggestionClient::new().with_failure();
        let settings = Settings::default();
        let result = client.suggest("", &settings, "IT", &[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn mock_client_failure_is_an_error() {
        let client = MockSuggestionClient::new().with_failure();
        let settings = Settings::default();
        let result = client.suggest("hello", &settings, "IT", &[]).await;
        assert!(matches!(result, Err(ParleyError::Suggestion { .. })));
    }
}
