//! Ingestion hook (session-end)
//!
//! Reads a JSON object with a `transcript_path` field from standard input,
//! extracts user/assistant turn pairs from the newline-delimited session
//! log, ingests them, and drops a completion marker in the data directory
//! so the host runtime can observe the outcome.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Local;
use directories::ProjectDirs;
use mnemo_core::providers::{ClaudeAnalyzer, OpenAiEmbedder};
use mnemo_core::{Config, Store, Turn, ingest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
struct HookInput {
    #[serde(default)]
    transcript_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompletionMarker {
    completed_at: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    transcript_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: serde_json::Value,
}

/// Flatten message content: either a plain string or an array of text parts
fn message_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(parts) => {
            let mut texts = Vec::new();
            for part in parts {
                match part {
                    serde_json::Value::String(text) => texts.push(text.clone()),
                    serde_json::Value::Object(map) => {
                        if map.get("type").and_then(|t| t.as_str()) == Some("text")
                            && let Some(text) = map.get("text").and_then(|t| t.as_str())
                        {
                            texts.push(text.to_string());
                        }
                    }
                    _ => {}
                }
            }
            texts.join("\n")
        }
        _ => String::new(),
    }
}

fn load_transcript(path: &Path) -> Vec<TranscriptMessage> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Pair each user message with the assistant message that follows it
fn extract_turns(messages: &[TranscriptMessage]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut pending_user: Option<String> = None;

    for message in messages {
        let text = message_text(&message.content);
        match message.role.as_str() {
            "user" => pending_user = Some(text),
            "assistant" => {
                if let Some(user) = pending_user.take() {
                    turns.push(Turn::new(user, text));
                }
            }
            _ => {}
        }
    }

    turns
}

fn marker_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "mnemo", "mnemo").map(|dirs| dirs.data_dir().join("last_ingest.json"))
}

fn write_marker(marker: &CompletionMarker) {
    let Some(path) = marker_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(marker) {
        Ok(json) => {
            if let Err(err) = std::fs::write(&path, json) {
                tracing::warn!(error = %err, "could not write completion marker");
            }
        }
        Err(err) => tracing::warn!(error = %err, "could not serialize completion marker"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut raw = String::new();
    let _ = std::io::stdin().read_to_string(&mut raw);
    let input: HookInput = serde_json::from_str(&raw).unwrap_or_default();

    let Some(transcript_path) = input.transcript_path else {
        tracing::debug!("no transcript path, nothing to ingest");
        return;
    };

    match run(&transcript_path).await {
        Ok(count) => write_marker(&CompletionMarker {
            completed_at: Local::now().fixed_offset().to_rfc3339(),
            success: true,
            error: None,
            count,
            transcript_path: Some(transcript_path),
        }),
        Err(err) => {
            tracing::error!(error = %err, "ingestion hook failed");
            write_marker(&CompletionMarker {
                completed_at: Local::now().fixed_offset().to_rfc3339(),
                success: false,
                error: Some(err.to_string()),
                count: 0,
                transcript_path: Some(transcript_path),
            });
        }
    }
}

async fn run(transcript_path: &str) -> anyhow::Result<usize> {
    let messages = load_transcript(Path::new(transcript_path));
    let turns = extract_turns(&messages);
    if turns.is_empty() {
        return Ok(0);
    }

    let config = Config::load(None)?;
    let store = Store::new(None)?;
    let embedder = OpenAiEmbedder::from_config(&config.embedding)
        .map_err(|e| anyhow::anyhow!("embedder unavailable: {e}"))?;
    let analyzer = ClaudeAnalyzer::from_config(&config.llm)
        .map_err(|e| anyhow::anyhow!("analyzer unavailable: {e}"))?;

    let records = ingest::process_turns(&store, &embedder, &analyzer, &turns, &config).await?;
    tracing::info!(count = records.len(), "session ingested");
    Ok(records.len())
}

// ============================================================================
// TESTS
// ============================================================================
