//! In-character captions for classification labels.

use crate::types::Label;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Catch-all phrase for labels without a table entry.
pub const UNKNOWN_LABEL_PHRASE: &str = "Meow meow... I don't know what to say";

/// External text generation service.
pub trait TextGenerator: Send + Sync {
    /// Generate text for a prompt. One attempt, no retries.
    fn generate(&self, prompt: &str) -> Result<String, TextGenerationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TextGenerationError {
    #[error("api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("rate limited")]
    RateLimited,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Where a caption came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionSource {
    Generated,
    Fallback,
}

/// Short caption for a label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caption {
    pub text: String,
    pub source: CaptionSource,
}

/// Maps labels to captions, preferring the text generator when configured.
///
/// Never fails: any generator error falls back to the static phrase table.
#[derive(Default)]
pub struct CaptionGenerator {
    generator: Option<Box<dyn TextGenerator>>,
}

impl CaptionGenerator {
    pub fn new(generator: impl TextGenerator + 'static) -> Self {
        Self {
            generator: Some(Box::new(generator)),
        }
    }

    /// Caption generator that only uses the static table.
    pub fn fallback_only() -> Self {
        Self { generator: None }
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Caption for a label name.
    ///
    /// Unknown names get [`UNKNOWN_LABEL_PHRASE`] when the generator is
    /// unavailable.
    pub fn caption(&self, label: &str) -> Caption {
        let Some(generator) = &self.generator else {
            return fallback_caption(label);
        };

        match generator.generate(&caption_prompt(label)) {
            Ok(text) if !text.trim().is_empty() => Caption {
                text: text.trim().to_string(),
                source: CaptionSource::Generated,
            },
            Ok(_) => {
                tracing::warn!(label, "text generator returned empty caption");
                fallback_caption(label)
            }
            Err(e) => {
                tracing::warn!(label, error = %e, "text generation failed");
                fallback_caption(label)
            }
        }
    }
}

/// Prompt sent to the text generator for a label.
pub fn caption_prompt(label: &str) -> String {
    format!(
        "I have a cat-language detection model and it shows the feeling '{label}'. \
         Pretend you are a cat feeling exactly that: what would you say? \
         Answer in English with cute, lively, cat-like words, only 3-4 words, \
         do not use the * character, emoji are allowed."
    )
}

fn fallback_caption(label: &str) -> Caption {
    Caption {
        text: fallback_phrase(label).to_string(),
        source: CaptionSource::Fallback,
    }
}

/// Static phrase for a label name, or [`UNKNOWN_LABEL_PHRASE`].
pub fn fallback_phrase(label: &str) -> &'static str {
    match Label::from_name(label) {
        Some(Label::Angry) => "Grrr... I'm so annoyed! Meow!",
        Some(Label::Brushing) => "Ahh... this brushing feels so good... meow~",
        Some(Label::Defense) => "Stay back! I'm ready to defend! Meow!",
        Some(Label::Fighting) => "I will fight you! Meow meow!",
        Some(Label::Happy) => "I'm so happy! Meow meow~",
        Some(Label::HuntingMind) => "I'm on the hunt... ssshhh... meow",
        Some(Label::Isolation) => "I want to be alone for now... meow...",
        Some(Label::Mating) => "Meow meow~ someone caught my eye",
        Some(Label::MotherCall) => "My kittens... where are you? Meow meow",
        Some(Label::Paining) => "Ouch... it hurts... meow...",
        Some(Label::Resting) => "Zzz... so sleepy... meow...",
        Some(Label::WaitingFood) => "I'm hungry! Where's my food? Meow meow!",
        Some(Label::Warning) => "Watch out! Danger! Meow!",
        None => UNKNOWN_LABEL_PHRASE,
    }
}

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Default Gemini model used for captions.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Gemini `generateContent` client.
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, TextGenerationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TextGenerationError::ApiRequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String, TextGenerationError> {
        let request_body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .map_err(|e| TextGenerationError::ApiRequestFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TextGenerationError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(TextGenerationError::ApiRequestFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let response: GenerateResponse = response
            .json()
            .map_err(|e| TextGenerationError::InvalidResponse(e.to_string()))?;

        response
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
            .ok_or_else(|| TextGenerationError::InvalidResponse("no text candidates".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl TextGenerator for Echo {
        fn generate(&self, prompt: &str) -> Result<String, TextGenerationError> {
            assert!(prompt.contains("'Happy'"));
            Ok("  Purr-fect day! 😺 \n".to_string())
        }
    }

    struct Failing;

    impl TextGenerator for Failing {
        fn generate(&self, _prompt: &str) -> Result<String, TextGenerationError> {
            Err(TextGenerationError::RateLimited)
        }
    }

    struct Blank;

    impl TextGenerator for Blank {
        fn generate(&self, _prompt: &str) -> Result<String, TextGenerationError> {
            Ok("   ".to_string())
        }
    }

    #[test]
    fn every_label_has_a_fallback_phrase() {
        let captions = CaptionGenerator::fallback_only();

        for label in Label::ALL {
            let caption = captions.caption(label.name());
            assert!(!caption.text.is_empty());
            assert_ne!(caption.text, UNKNOWN_LABEL_PHRASE, "{label}");
            assert_eq!(caption.source, CaptionSource::Fallback);
        }
    }

    #[test]
    fn unknown_label_gets_catch_all() {
        let caption = CaptionGenerator::fallback_only().caption("unknown_13");
        assert_eq!(caption.text, UNKNOWN_LABEL_PHRASE);
    }

    #[test]
    fn generated_text_is_trimmed() {
        let caption = CaptionGenerator::new(Echo).caption("Happy");

        assert_eq!(caption.text, "Purr-fect day! 😺");
        assert_eq!(caption.source, CaptionSource::Generated);
    }

    #[test]
    fn generator_errors_fall_back_to_table() {
        let captions = CaptionGenerator::new(Failing);

        for label in Label::ALL {
            let caption = captions.caption(label.name());
            assert_eq!(caption.text, fallback_phrase(label.name()));
            assert_eq!(caption.source, CaptionSource::Fallback);
        }
    }

    #[test]
    fn blank_generation_falls_back() {
        let caption = CaptionGenerator::new(Blank).caption("Resting");
        assert_eq!(caption.text, fallback_phrase("Resting"));
    }

    #[test]
    fn prompt_restricts_reply() {
        let prompt = caption_prompt("Waiting_food");
        assert!(prompt.contains("'Waiting_food'"));
        assert!(prompt.contains("3-4 words"));
        assert!(prompt.contains("emoji"));
    }

    #[test]
    fn parses_gemini_response() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "Feed me now! 🐟"}], "role": "model"}}
            ]
        }"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        let text = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text);

        assert_eq!(text.as_deref(), Some("Feed me now! 🐟"));
    }

    #[test]
    #[ignore = "network I/O and GEMINI_API_KEY required"]
    fn gemini_generates_caption() {
        let key = std::env::var("GEMINI_API_KEY").unwrap();
        let client = GeminiClient::new(
            key,
            DEFAULT_GEMINI_MODEL.to_string(),
            Duration::from_secs(20),
        )
        .unwrap();

        let caption = CaptionGenerator::new(client).caption("Happy");
        assert_eq!(caption.source, CaptionSource::Generated);
    }
}
