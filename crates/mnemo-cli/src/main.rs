//! Mnemo CLI
//!
//! Management interface for the memory store: inspect, protect, delete,
//! search, and run the daily compression batch.

use std::io::Write;

use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mnemo_core::providers::{ClaudeAnalyzer, OpenAiEmbedder};
use mnemo_core::{Category, Config, MemoryPatch, MemoryRecord, Store, batch};

/// Mnemo - Long-term memory for a conversational assistant
#[derive(Parser)]
#[command(name = "mnemo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage the assistant's long-term memory store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List memories
    List {
        /// Filter by compression level (1-4)
        #[arg(long, short = 'l')]
        level: Option<i64>,
        /// Show archived memories instead of active ones
        #[arg(long, short = 'a')]
        archived: bool,
        /// Show only protected memories
        #[arg(long, short = 'p')]
        protected: bool,
        /// Limit results
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Show one memory in full
    Show {
        /// Memory ID
        memory_id: String,
    },

    /// Delete a memory
    Delete {
        /// Memory ID
        memory_id: String,
        /// Skip confirmation (required for protected memories)
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Protect a memory from compression and deletion
    Protect {
        /// Memory ID
        memory_id: String,
    },

    /// Remove a memory's protection
    Unprotect {
        /// Memory ID
        memory_id: String,
    },

    /// Show store statistics
    Stats,

    /// Search memories by keyword
    Search {
        /// Search query (matched against trigger, content, and keywords)
        query: String,
        /// Search active memories only
        #[arg(long, short = 'a')]
        active_only: bool,
        /// Limit results
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Delete ALL archived memories (protected ones are preserved)
    PurgeArchive {
        /// Skip confirmation
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Run the daily compression batch
    Batch {
        /// Run even if a batch already completed today
        #[arg(long, short = 'f')]
        force: bool,
        /// Print pre/post statistics
        #[arg(long, short = 'v')]
        verbose: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List {
            level,
            archived,
            protected,
            limit,
        } => run_list(level, archived, protected, limit),
        Commands::Show { memory_id } => run_show(&memory_id),
        Commands::Delete { memory_id, force } => run_delete(&memory_id, force),
        Commands::Protect { memory_id } => run_protect(&memory_id, true),
        Commands::Unprotect { memory_id } => run_protect(&memory_id, false),
        Commands::Stats => run_stats(),
        Commands::Search {
            query,
            active_only,
            limit,
        } => run_search(&query, active_only, limit),
        Commands::PurgeArchive { force } => run_purge_archive(force),
        Commands::Batch { force, verbose } => run_batch(force, verbose),
    }
}

fn not_found(memory_id: &str) -> ! {
    println!("Memory not found: {memory_id}");
    std::process::exit(1);
}

/// Shorten an ISO timestamp to its date
fn format_date(timestamp: Option<DateTime<FixedOffset>>) -> String {
    match timestamp {
        Some(t) => t.format("%Y-%m-%d").to_string(),
        None => "-".to_string(),
    }
}

/// Truncate a string for display (UTF-8 safe)
fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_chars {
        s
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn print_table(memories: &[MemoryRecord]) {
    println!(
        "{:<25} {:<12} {:>2} {:>7} {:>1} {:<40}",
        "ID".bold(),
        "Date".bold(),
        "L".bold(),
        "Score".bold(),
        "P".bold(),
        "Trigger".bold()
    );
    println!("{}", "-".repeat(95));

    for memory in memories {
        let protected = if memory.protected { "P" } else { "" };
        let archived = if memory.is_archived() { "[A]" } else { "" };
        println!(
            "{:<25} {:<12} {:>2} {:>7.1} {:>1} {}{:<40}",
            truncate(&memory.id, 24),
            format_date(Some(memory.created)),
            memory.current_level,
            memory.retention(),
            protected,
            archived.dimmed(),
            truncate(&memory.trigger, 40)
        );
    }
}

/// Run list command
fn run_list(level: Option<i64>, archived: bool, protected: bool, limit: usize) -> anyhow::Result<()> {
    let store = Store::new(None)?;

    let mut memories = if archived {
        store.get_archived()?
    } else {
        store.get_active()?
    };

    if let Some(level) = level {
        memories.retain(|m| m.current_level == level);
    }
    if protected {
        memories.retain(|m| m.protected);
    }

    memories.sort_by(|a, b| {
        b.retention()
            .partial_cmp(&a.retention())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    memories.truncate(limit);

    if memories.is_empty() {
        println!("No memories found.");
        return Ok(());
    }

    print_table(&memories);
    println!();
    println!("Total: {} memories", memories.len());
    Ok(())
}

/// Run show command
fn run_show(memory_id: &str) -> anyhow::Result<()> {
    let store = Store::new(None)?;
    let Some(memory) = store.get(memory_id)? else {
        not_found(memory_id);
    };

    println!("{:<20}{}", "ID:".bold(), memory.id);
    println!("{:<20}{}", "Created:".bold(), memory.created.to_rfc3339());
    println!("{:<20}{}", "Level:".bold(), memory.current_level);
    println!("{:<20}{:.2}", "Retention Score:".bold(), memory.retention());
    println!("{:<20}{:.2}", "Memory Days:".bold(), memory.memory_days);
    println!("{:<20}{:.4}", "Decay Coefficient:".bold(), memory.decay_coefficient);
    println!("{:<20}{}", "Recall Count:".bold(), memory.recall_count);
    println!(
        "{:<20}{}",
        "Protected:".bold(),
        if memory.protected { "Yes" } else { "No" }
    );
    println!(
        "{:<20}{}",
        "Archived:".bold(),
        memory
            .archived_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "No".to_string())
    );
    println!("{:<20}{}", "Category:".bold(), memory.category);
    println!("{:<20}{}", "Intensity:".bold(), memory.emotional_intensity);
    println!("{:<20}{}", "Valence:".bold(), memory.emotional_valence);
    println!("{:<20}{}", "Arousal:".bold(), memory.emotional_arousal);
    println!("{:<20}{}", "Emotional Tags:".bold(), memory.emotional_tags.join(", "));
    println!("{:<20}{}", "Keywords:".bold(), memory.keywords.join(", "));
    println!("{:<20}{}", "Relations:".bold(), memory.relations.join(", "));
    println!(
        "{:<20}{}",
        "Embedding:".bold(),
        match &memory.embedding {
            Some(v) => format!("{} dims", v.len()),
            None => "absent".to_string(),
        }
    );
    println!();
    println!("{}", "--- Trigger ---".cyan());
    println!("{}", memory.trigger);
    println!();
    println!("{}", "--- Content ---".cyan());
    println!("{}", memory.content);
    Ok(())
}

fn confirm(prompt: &str, expected: &str) -> anyhow::Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut input = String::new();
    let _ = std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Run delete command
fn run_delete(memory_id: &str, force: bool) -> anyhow::Result<()> {
    let store = Store::new(None)?;
    let Some(memory) = store.get(memory_id)? else {
        not_found(memory_id);
    };

    if memory.protected && !force {
        println!("Memory is protected. Use --force to delete.");
        std::process::exit(1);
    }

    if !force {
        println!("Delete memory: {memory_id}");
        println!("  Trigger: {}", truncate(&memory.trigger, 60));
        if !confirm("Are you sure? (y/N): ", "y")? {
            println!("Cancelled.");
            std::process::exit(1);
        }
    }

    let _ = store.delete(memory_id)?;
    println!("{}", format!("Deleted: {memory_id}").green());
    Ok(())
}

/// Run protect / unprotect
fn run_protect(memory_id: &str, protect: bool) -> anyhow::Result<()> {
    let store = Store::new(None)?;
    let Some(memory) = store.get(memory_id)? else {
        not_found(memory_id);
    };

    if memory.protected == protect {
        println!(
            "Memory is {} protected.",
            if protect { "already" } else { "not" }
        );
        return Ok(());
    }

    if protect {
        let config = Config::load(None)?;
        let current = store.count_protected()?;
        if current >= config.protection.max_protected_memories {
            println!(
                "Protection limit reached ({current}/{}).",
                config.protection.max_protected_memories
            );
            std::process::exit(1);
        }
    }

    store.update(
        memory_id,
        MemoryPatch {
            protected: Some(protect),
            ..Default::default()
        },
    )?;
    println!(
        "{}",
        format!(
            "{}: {memory_id}",
            if protect { "Protected" } else { "Unprotected" }
        )
        .green()
    );
    Ok(())
}

/// Run stats command
fn run_stats() -> anyhow::Result<()> {
    let store = Store::new(None)?;

    let total = store.count_memories(true)?;
    let active = store.count_memories(false)?;
    let archived = total - active;
    let protected = store.count_protected()?;
    let by_level = store.count_by_level()?;
    let by_category = store.count_by_category()?;
    let avg_score = store.average_retention()?;
    let pending = store.count_recalled_pending()?;
    let db_size = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);

    println!("{}", "=== Memory Statistics ===".cyan().bold());
    println!();
    println!("{:<20}{}", "Total Memories:".bold(), total);
    println!("{:<20}{}", "  Active:".bold(), active);
    println!("{:<20}{}", "  Archived:".bold(), archived);
    println!("{:<20}{}", "  Protected:".bold(), protected);
    println!();
    println!("{}", "By Level (Active):".bold());
    for level in 1..=4 {
        let count = by_level.get(&level).copied().unwrap_or(0);
        let pct = if active > 0 {
            count as f64 / active as f64 * 100.0
        } else {
            0.0
        };
        println!("  Level {level}:          {count:>5} ({pct:>5.1}%)");
    }
    println!();
    println!("{}", "By Category (Active):".bold());
    for category in Category::ALL {
        let count = by_category.get(&category).copied().unwrap_or(0);
        let pct = if active > 0 {
            count as f64 / active as f64 * 100.0
        } else {
            0.0
        };
        println!("  {:<12}      {count:>5} ({pct:>5.1}%)", category.as_str());
    }
    println!();
    println!("{:<21}{avg_score:.2}", "Avg Retention Score:".bold());
    println!("{:<21}{pending}", "Pending Recall:".bold());
    println!(
        "{:<21}{:.2} MB",
        "Database Size:".bold(),
        db_size as f64 / 1024.0 / 1024.0
    );
    Ok(())
}

/// Run search command
fn run_search(query: &str, active_only: bool, limit: usize) -> anyhow::Result<()> {
    let store = Store::new(None)?;
    let needle = query.to_lowercase();

    let mut results: Vec<MemoryRecord> = store
        .get_all(!active_only)?
        .into_iter()
        .filter(|m| {
            m.trigger.to_lowercase().contains(&needle)
                || m.content.to_lowercase().contains(&needle)
                || m.keywords.iter().any(|k| k.to_lowercase().contains(&needle))
        })
        .collect();

    results.sort_by(|a, b| {
        b.retention()
            .partial_cmp(&a.retention())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);

    if results.is_empty() {
        println!("No memories found for: {query}");
        return Ok(());
    }

    println!("Found {} memories for '{query}':", results.len());
    println!();
    print_table(&results);
    Ok(())
}

/// Run purge-archive command
fn run_purge_archive(force: bool) -> anyhow::Result<()> {
    let store = Store::new(None)?;
    let archived = store.get_archived()?;

    if archived.is_empty() {
        println!("No archived memories to delete.");
        return Ok(());
    }

    let to_delete: Vec<&MemoryRecord> = archived.iter().filter(|m| !m.protected).collect();
    let protected_count = archived.len() - to_delete.len();

    if to_delete.is_empty() {
        println!(
            "All {} archived memories are protected. Nothing to delete.",
            archived.len()
        );
        return Ok(());
    }

    println!("Found {} archived memories to delete.", to_delete.len());
    if protected_count > 0 {
        println!("  ({protected_count} protected memories will be preserved)");
    }

    if !force
        && !confirm(
            "Are you sure you want to delete ALL archived memories? (yes/N): ",
            "yes",
        )?
    {
        println!("Cancelled.");
        std::process::exit(1);
    }

    let mut deleted = 0;
    for memory in to_delete {
        if store.delete(&memory.id)? {
            deleted += 1;
        }
    }

    println!("{}", format!("Deleted {deleted} archived memories.").green());
    Ok(())
}

fn print_db_stats(store: &Store, label: &str) -> anyhow::Result<()> {
    let active = store.count_memories(false)?;
    let by_level = store.count_by_level()?;
    let protected = store.count_protected()?;
    let db_size = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);
    let size_mb = db_size as f64 / 1024.0 / 1024.0;

    println!("{label}: {active} active, {protected} protected, {size_mb:.2} MB");
    for level in 1..=4 {
        let count = by_level.get(&level).copied().unwrap_or(0);
        if count > 0 {
            println!("  Level {level}: {count}");
        }
    }
    if size_mb > 1024.0 {
        println!(
            "{}",
            "  WARNING: Database size exceeds 1GB. Consider running VACUUM.".yellow()
        );
    }
    Ok(())
}

/// Run the daily compression batch
fn run_batch(force: bool, verbose: bool) -> anyhow::Result<()> {
    let config = Config::load(None)?;
    let store = Store::new(None)?;

    if verbose {
        print_db_stats(&store, "Pre-batch stats")?;
        println!();
    }

    let embedder = OpenAiEmbedder::from_config(&config.embedding)
        .map_err(|e| anyhow::anyhow!("embedder unavailable: {e}"))?;
    let analyzer = ClaudeAnalyzer::from_config(&config.llm)
        .map_err(|e| anyhow::anyhow!("analyzer unavailable: {e}"))?;

    let started = std::time::Instant::now();
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(batch::run(&store, &embedder, &analyzer, &config, force))?;
    let elapsed = started.elapsed();

    if !result.executed {
        println!(
            "Skipped: {}",
            result.skipped_reason.as_deref().unwrap_or("not due")
        );
        return Ok(());
    }

    println!("{}", "Compression batch completed:".green().bold());
    println!("  Elapsed time: {:.2}s", elapsed.as_secs_f64());
    println!("  Recalled processed: {}", result.recalled_processed);
    println!("  Memory days updated: {}", result.memory_days_updated);
    println!("  Retention scores updated: {}", result.retention_rescored);
    println!(
        "  Compression: 1->2: {}, 2->3: {}, archived: {}",
        result.compression.level1_to_level2,
        result.compression.level2_to_level3,
        result.compression.archived
    );
    println!("  Revived: {}", result.revived);
    println!(
        "  Relations: integrity {}, direction {}, linked {}",
        result.relations.integrity_fixed,
        result.relations.direction_fixed,
        result.relations.auto_linked
    );
    println!("  Deleted: {}", result.deleted);

    if verbose {
        println!();
        print_db_stats(&store, "Post-batch stats")?;
    }
    Ok(())
}
