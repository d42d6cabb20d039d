//! External translation service contract and HTTP client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::TranslationConfig;
use crate::error::{ParleyError, Result};

/// A completed translation with the language the service detected.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Translation {
    pub text: String,
    /// Detected source language code (e.g. "IT"). Empty when the input was
    /// empty and no call was made.
    pub detected_source_language: String,
}

/// Trait for the translation stage.
///
/// This trait allows swapping implementations (real HTTP service vs mock).
/// Failures surface as errors, distinguishable from the valid empty-input
/// case which returns an empty translation without a network call.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text`, auto-detecting the source language.
    async fn translate(&self, text: &str) -> Result<Translation>;
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translations: Vec<TranslatedEntry>,
}

#[derive(Debug, Deserialize)]
struct TranslatedEntry {
    #[serde(default)]
    text: String,
    #[serde(default)]
    detected_source_language: String,
}

/// Translation over an HTTP API with DeepL-style request/response shapes.
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    target_lang: String,
}

impl HttpTranslator {
    pub fn new(config: &TranslationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            target_lang: config.target_lang.clone(),
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str) -> Result<Translation> {
        // Don't waste API calls on empty strings
        if text.trim().is_empty() {
            return Ok(Translation::default());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                "Authorization",
                format!("DeepL-Auth-Key {}", self.api_key),
            )
            .json(&json!({
                "text": [text],
                "target_lang": self.target_lang,
            }))
            .send()
            .await
            .map_err(|e| ParleyError::Translation {
                message: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(ParleyError::Translation {
                message: format!("service returned {}", response.status()),
            });
        }

        let body: TranslateResponse =
            response
                .json()
                .await
                .map_err(|e| ParleyError::Translation {
                    message: format!("invalid response body: {e}"),
                })?;

        let entry = body
            .translations
            .into_iter()
            .next()
            .ok_or_else(|| ParleyError::Translation {
                message: "response carried no translations".to_string(),
            })?;

        Ok(Translation {
            text: entry.text,
            detected_source_language: entry.detected_source_language,
        })
    }
}

/// Mock translator for testing
#[derive(Debug, Clone)]
pub struct MockTranslator {
    response: String,
    detected_language: String,
    should_fail: bool,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self {
            response: "mock translation".to_string(),
            detected_language: "IT".to_string(),
            should_fail: false,
        }
    }

    /// Configure the mock to return a specific translation
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the detected source language
    pub fn with_detected_language(mut self, language: &str) -> Self {
        self.detected_language = language.to_string();
        self
    }

    /// Configure the mock to fail on translate
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Default for MockTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, text: &str) -> Result<Translation> {
        if text.trim().is_empty() {
            return Ok(Translation::default());
        }
        if self.should_fail {
            return Err(ParleyError::Translation {
                message: "mock translation failure".to_string(),
            });
        }
        Ok(Translation {
            text: self.response.clone(),
            detected_source_language: self.detected_language.clone(),
        })
    }
}
