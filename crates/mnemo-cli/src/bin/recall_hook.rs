//! Retrieval hook (prompt-submit)
//!
//! Reads a JSON object with a `prompt` field from standard input and, when
//! relevant memories exist, writes the `<memories>` block to standard
//! output for the host runtime to inject. Everything else is silent:
//! diagnostics go to stderr and every failure is a no-op.

use std::io::Read;

use mnemo_core::providers::{Analyzer, ClaudeAnalyzer, OpenAiEmbedder};
use mnemo_core::{Config, Store, retrieval};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct HookInput {
    #[serde(default)]
    prompt: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // The hook contract forbids diagnostics on stdout
        tracing::error!(error = %err, "retrieval hook failed");
    }
}

async fn run() -> anyhow::Result<()> {
    let mut raw = String::new();
    let _ = std::io::stdin().read_to_string(&mut raw)?;
    let input: HookInput = serde_json::from_str(&raw).unwrap_or_default();

    if retrieval::should_skip(&input.prompt) {
        return Ok(());
    }

    let config = Config::load(None).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "config unreadable, using defaults");
        Config::default()
    });
    let store = Store::new(None)?;

    let embedder = match OpenAiEmbedder::from_config(&config.embedding) {
        Ok(embedder) => embedder,
        Err(err) => {
            tracing::warn!(error = %err, "embedder unavailable, skipping recall");
            return Ok(());
        }
    };
    let analyzer = match ClaudeAnalyzer::from_config(&config.llm) {
        Ok(analyzer) => Some(analyzer),
        Err(err) => {
            tracing::warn!(error = %err, "analyzer unavailable, recalling without classification");
            None
        }
    };
    let analyzer_ref: Option<&dyn Analyzer> = analyzer.as_ref().map(|a| a as &dyn Analyzer);

    let hits = retrieval::retrieve(&store, &embedder, analyzer_ref, &input.prompt, &config).await?;
    if !hits.is_empty() {
        println!("{}", retrieval::format_memories(&hits));
    }
    Ok(())
}
