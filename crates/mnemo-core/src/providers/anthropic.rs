//! Claude analyzer client
//!
//! Emotion analysis, prompt classification, and the two compression
//! rewrites, all through the Anthropic messages API. Responses are JSON
//! inside fenced code blocks; the fences are stripped before parsing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use super::{Analyzer, ProviderError, ProviderResult, PromptClassification};
use crate::config::LlmConfig;
use crate::memory::{Category, EmotionSnapshot, Turn, TurnAnalysis, Valence};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Concurrent request cap for batch analysis
pub const MAX_CONCURRENT_ANALYSES: usize = 10;

const ANALYSIS_PROMPT: &str = r#"Analyze the following exchange and answer in the JSON shape below.

## Exchange
User: {user_message}
Assistant: {assistant_message}

## Output (JSON only, no commentary)
```json
{
  "emotional_intensity": <integer 0-100: emotional significance>,
  "emotional_valence": "<positive/negative/neutral>",
  "emotional_arousal": <integer 0-100: emotional activation>,
  "emotional_tags": ["<tag>", ...],
  "category": "<casual/work/decision/emotional>",
  "keywords": ["<keyword>", ...],
  "protected": <true when the user asks to remember this, else false>
}
```

## Guidance
- emotional_intensity: routine technical exchange = 15-25, deeply emotional exchange = 70-85
- category: small talk = casual, work topics = work, significant decisions = decision, emotionally loaded = emotional
- protected: true only for explicit requests like "remember this" or "don't forget""#;

const CLASSIFY_PROMPT: &str = r#"Classify the following user prompt and answer in the JSON shape below.

## Prompt
{prompt}

## Output (JSON only, no commentary)
```json
{
  "category": "<casual/work/decision/emotional>",
  "valence": "<positive/negative/neutral>",
  "arousal": <integer 0-100>,
  "tags": ["<emotion tag>", ...]
}
```"#;

const SUMMARIZE_PROMPT: &str = r#"Summarize this memory.

## Approach
- trigger: what prompted the exchange, 1-2 sentences, keep the concrete topic
- content: how it went, 2-3 sentences, keep what was explained and how the user reacted
- Never drop proper nouns, technical terms, or concrete topics
- Keep emotional nuance when present

## Original
Trigger:
{trigger}

Content:
{content}

## Output (JSON only, no commentary)
```json
{
  "trigger": "<summarized trigger>",
  "content": "<summarized content>"
}
```"#;

const KEYWORDS_PROMPT: &str = r#"Extract 5-10 important keywords from the text below.

## Text
{text}

## Output (JSON only, no commentary)
```json
{
  "keywords": ["keyword", ...]
}
```"#;

/// LLM analyzer backed by the Anthropic messages API
pub struct ClaudeAnalyzer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_concurrent: usize,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    valence: Option<String>,
    #[serde(default)]
    arousal: Option<i64>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct RewriteResponse {
    #[serde(default)]
    trigger: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct KeywordsResponse {
    #[serde(default)]
    keywords: Vec<String>,
}

impl ClaudeAnalyzer {
    /// Build a client for the given model
    pub fn new(api_key: impl Into<String>, config: &LlmConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_concurrent: MAX_CONCURRENT_ANALYSES,
        })
    }

    /// Build from configuration, reading the key from `ANTHROPIC_API_KEY`
    pub fn from_config(config: &LlmConfig) -> ProviderResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
        Self::new(api_key, config)
    }

    async fn complete_once(&self, prompt: &str) -> ProviderResult<String> {
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        body.content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| ProviderError::Malformed("empty response content".to_string()))
    }

    async fn complete(&self, prompt: &str) -> ProviderResult<String> {
        let mut last_error = ProviderError::Config("no attempts made".to_string());

        for attempt in 0..MAX_RETRIES {
            match self.complete_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(err @ ProviderError::Malformed(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "llm request failed");
                    if attempt + 1 < MAX_RETRIES {
                        let delay = match err {
                            ProviderError::RateLimited => RETRY_DELAY * (attempt + 1),
                            _ => RETRY_DELAY,
                        };
                        tokio::time::sleep(delay).await;
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    async fn analyze_turn(&self, turn: &Turn) -> ProviderResult<TurnAnalysis> {
        let prompt = ANALYSIS_PROMPT
            .replace("{user_message}", &turn.user)
            .replace("{assistant_message}", &turn.assistant);
        let text = self.complete(&prompt).await?;
        let value = extract_json(&text)?;

        let mut analysis: TurnAnalysis = serde_json::from_value(value)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        analysis.emotional_intensity = analysis.emotional_intensity.clamp(0, 100);
        analysis.emotional_arousal = analysis.emotional_arousal.clamp(0, 100);
        Ok(analysis)
    }

    async fn extract_keywords(&self, text: &str) -> ProviderResult<Vec<String>> {
        let prompt = KEYWORDS_PROMPT.replace("{text}", text);
        let response = self.complete(&prompt).await?;
        let parsed: KeywordsResponse = serde_json::from_value(extract_json(&response)?)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(parsed.keywords)
    }
}

/// Pull the JSON payload out of a fenced (or bare) LLM response
fn extract_json(text: &str) -> ProviderResult<serde_json::Value> {
    let payload = if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        text
    };

    serde_json::from_str(payload.trim()).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze_batch(&self, turns: &[Turn]) -> ProviderResult<HashMap<usize, TurnAnalysis>> {
        async fn analyze_one(
            this: &ClaudeAnalyzer,
            turns: &[Turn],
            index: usize,
        ) -> (usize, ProviderResult<TurnAnalysis>) {
            (index, this.analyze_turn(&turns[index]).await)
        }

        let results: Vec<(usize, ProviderResult<TurnAnalysis>)> =
            futures::stream::iter(0..turns.len())
                .map(|index| analyze_one(self, turns, index))
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        let mut analyses = HashMap::new();
        for (index, result) in results {
            match result {
                Ok(analysis) => {
                    let _ = analyses.insert(index, analysis);
                }
                Err(err) => tracing::warn!(index, error = %err, "turn analysis failed"),
            }
        }
        Ok(analyses)
    }

    async fn classify_prompt(&self, prompt: &str) -> ProviderResult<PromptClassification> {
        let request = CLASSIFY_PROMPT.replace("{prompt}", prompt);
        let text = self.complete(&request).await?;
        let parsed: ClassifyResponse = serde_json::from_value(extract_json(&text)?)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(PromptClassification {
            category: parsed.category.as_deref().map(Category::parse_name),
            emotion: Some(EmotionSnapshot {
                valence: parsed
                    .valence
                    .as_deref()
                    .map(Valence::parse_name)
                    .unwrap_or_default(),
                arousal: parsed.arousal.unwrap_or(50).clamp(0, 100),
                tags: parsed.tags,
            }),
        })
    }

    async fn compress_to_level2(
        &self,
        trigger: &str,
        content: &str,
    ) -> ProviderResult<(String, String)> {
        let prompt = SUMMARIZE_PROMPT
            .replace("{trigger}", trigger)
            .replace("{content}", content);
        let text = self.complete(&prompt).await?;
        let parsed: RewriteResponse = serde_json::from_value(extract_json(&text)?)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok((
            parsed.trigger.unwrap_or_else(|| trigger.to_string()),
            parsed.content.unwrap_or_else(|| content.to_string()),
        ))
    }

    async fn compress_to_level3(
        &self,
        trigger: &str,
        content: &str,
    ) -> ProviderResult<(String, String)> {
        let trigger_keywords = self.extract_keywords(trigger).await?;
        let content_keywords = self.extract_keywords(content).await?;

        let trigger_result = if trigger_keywords.is_empty() {
            trigger.to_string()
        } else {
            trigger_keywords.join(", ")
        };
        let content_result = if content_keywords.is_empty() {
            content.to_string()
        } else {
            content_keywords.join(", ")
        };

        Ok((trigger_result, content_result))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_from_json_fence() {
        let text = "Here you go:\n```json\n{\"keywords\": [\"a\", \"b\"]}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["keywords"][0], "a");
    }

    #[test]
    fn extract_json_from_bare_fence() {
        let text = "```\n{\"trigger\": \"t\"}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["trigger"], "t");
    }

    #[test]
    fn extract_json_without_fence() {
        let value = extract_json("{\"category\": \"work\"}").unwrap();
        assert_eq!(value["category"], "work");
    }

    #[test]
    fn extract_json_rejects_non_json() {
        assert!(matches!(
            extract_json("I could not produce JSON, sorry."),
            Err(ProviderError::Malformed(_))
        ));
    }
}
