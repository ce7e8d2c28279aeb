use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TranslateConfig;
use crate::error::{Result, SubpipeError};
use super::Translator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTranslationResult {
    pub translations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Translator backed by an Ollama server.
pub struct OllamaTranslator {
    client: Client,
    config: TranslateConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Send one prompt, retrying transport and server errors.
    async fn generate(&self, prompt: String) -> Result<String> {
        let request = TranslationRequest {
            model: self.config.model.clone(),
            prompt,
            stream: false,
            format: "json".to_string(),
        };
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));

        let mut attempt = 0;
        loop {
            match self.send(&url, &request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!("Translation request failed (attempt {}/{}): {}", attempt, self.config.max_retries, e);
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, url: &str, request: &TranslationRequest) -> Result<String> {
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| SubpipeError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SubpipeError::Translation(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let body: TranslationResponse = response
            .json()
            .await
            .map_err(|e| SubpipeError::Translation(format!("Failed to parse response: {}", e)))?;

        let raw = body.response.trim().to_string();
        debug!("Raw Ollama response: {}", raw);
        if raw.is_empty() {
            return Err(SubpipeError::Translation("Empty translation received".to_string()));
        }
        Ok(raw)
    }

    async fn translate_line(&self, text: &str) -> Result<String> {
        let raw = self.generate(self.build_line_prompt(text)).await?;
        Ok(parse_line_response(&raw))
    }

    fn build_batch_prompt(&self, texts: &[String]) -> String {
        let numbered = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}", i + 1, t))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are a professional subtitle translator.\n\
             Translate each of the following {count} numbered {source} subtitle lines into {target}.\n\
             Keep the same order and produce exactly one translation per line. Do not merge or split lines.\n\
             Return only JSON in the form {{\"translations\": [\"...\", ...]}} with {count} entries.\n\
             \n\
             [Lines]\n\
             {numbered}",
            count = texts.len(),
            source = language_code_to_name(&self.config.source_language),
            target = language_code_to_name(&self.config.target_language),
            numbered = numbered,
        )
    }

    fn build_line_prompt(&self, text: &str) -> String {
        format!(
            "You are a professional subtitle translator.\n\
             Translate the following {} subtitle line into {}.\n\
             Return only JSON in the form {{\"text\": \"translation\"}}.\n\
             \n\
             [Line]\n\
             {}",
            language_code_to_name(&self.config.source_language),
            language_code_to_name(&self.config.target_language),
            text
        )
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/show", self.config.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": self.config.model }))
            .send()
            .await
            .map_err(|e| SubpipeError::ModelLoad(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            info!("Ollama model '{}' is available", self.config.model);
            Ok(())
        } else {
            Err(SubpipeError::ModelLoad(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                self.config.model, self.config.model
            )))
        }
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>> {
        if texts.len() == 1 {
            return Ok(vec![self.translate_line(&texts[0]).await?]);
        }

        let raw = self.generate(self.build_batch_prompt(texts)).await?;
        match parse_batch_response(&raw) {
            Some(lines) if lines.len() == texts.len() => Ok(lines),
            other => {
                warn!(
                    "Batch response had {} lines for {} inputs, translating line by line",
                    other.map_or(0, |l| l.len()),
                    texts.len()
                );
                let mut lines = Vec::with_capacity(texts.len());
                for text in texts {
                    lines.push(self.translate_line(text).await?);
                }
                Ok(lines)
            }
        }
    }
}

/// Extract the translation list from a batch response.
pub fn parse_batch_response(raw: &str) -> Option<Vec<String>> {
    let raw = strip_code_fence(raw);
    if let Ok(result) = serde_json::from_str::<BatchTranslationResult>(raw) {
        return Some(result.translations);
    }
    serde_json::from_str::<Vec<String>>(raw).ok()
}

/// Extract a single translation, tolerating models that ignore the JSON format.
pub fn parse_line_response(raw: &str) -> String {
    let raw = strip_code_fence(raw);
    if let Ok(result) = serde_json::from_str::<TranslationResult>(raw) {
        return result.text.trim().to_string();
    }
    raw.trim().trim_matches('"').trim().to_string()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// English name of a language code, for prompts.
pub fn language_code_to_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "ja" => "Japanese".to_string(),
        "ko" => "Korean".to_string(),
        "zh" => "Chinese".to_string(),
        "en" => "English".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "es" => "Spanish".to_string(),
        "ru" => "Russian".to_string(),
        "it" => "Italian".to_string(),
        "pt" => "Portuguese".to_string(),
        "nl" => "Dutch".to_string(),
        "pl" => "Polish".to_string(),
        "tr" => "Turkish".to_string(),
        "ar" => "Arabic".to_string(),
        "hi" => "Hindi".to_string(),
        "th" => "Thai".to_string(),
        "vi" => "Vietnamese".to_string(),
        "id" => "Indonesian".to_string(),
        "uk" => "Ukrainian".to_string(),
        "sv" => "Swedish".to_string(),
        _ => code.to_string(),
    }
}
