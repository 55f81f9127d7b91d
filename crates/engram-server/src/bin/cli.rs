//! Engram CLI
//!
//! Command-line interface for the memory store: inspection (`stats`,
//! `recent`, `search`, `show`, `status`), maintenance (`decay`, `prune`,
//! `forget`), and the HTTP daemon (`serve`, `start`, `stop`, `restart`).

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use engram_core::{Config, Engram, ForgetInput, RecallInput};
use engram_server::daemon::{self, DaemonStatus};
use engram_server::protocol::http;

/// Engram - memory store for AI coding agents
#[derive(Parser)]
#[command(name = "engram")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the Engram memory store")]
#[command(long_about = "Engram persists short textual memories for AI coding agents and \
serves ranked recall over semantic search with full-text fallback.\n\nAll state lives in a \
single SQLite file; configuration comes from ENGRAM_* environment variables.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store statistics and metrics
    Stats,

    /// List recent memories
    Recent {
        /// Maximum number to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Search memories (a full recall: returned memories are strengthened)
    Search {
        /// Query text
        query: String,
        /// Maximum number of results
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Restrict to a scope
        #[arg(long)]
        scope: Option<String>,
        /// Restrict to a category hint
        #[arg(long)]
        category: Option<String>,
        /// Minimum effective strength
        #[arg(long, default_value = "0.1")]
        min_strength: f64,
    },

    /// Show one memory in full
    Show {
        /// Memory id
        id: String,
    },

    /// Delete a memory by id
    Forget {
        /// Memory id
        id: String,
        /// Scope guard (with scopes enabled, omitted matches unscoped rows only)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Preview time-decayed strengths; --apply persists them
    Decay {
        /// Persist the computed strengths
        #[arg(long)]
        apply: bool,
    },

    /// Delete memories whose effective strength fell below a threshold
    Prune {
        /// Effective-strength threshold
        #[arg(long, default_value = "0.1")]
        threshold: f64,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Report daemon and store status
    Status,

    /// Run the HTTP server in the foreground
    Serve,

    /// Start the HTTP server as a background daemon
    Start,

    /// Stop the background daemon
    Stop,

    /// Restart the background daemon
    Restart,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Stats => run_stats(config),
        Commands::Recent { limit } => run_recent(config, limit),
        Commands::Search {
            query,
            limit,
            scope,
            category,
            min_strength,
        } => run_search(config, query, limit, scope, category, min_strength),
        Commands::Show { id } => run_show(config, id),
        Commands::Forget { id, scope } => run_forget(config, id, scope),
        Commands::Decay { apply } => run_decay(config, apply),
        Commands::Prune {
            threshold,
            dry_run,
            yes,
        } => run_prune(config, threshold, dry_run, yes),
        Commands::Status => run_status(config),
        Commands::Serve => run_serve(config),
        Commands::Start => daemon::start(&config).map(|_| println!("{}", "daemon started".green())),
        Commands::Stop => run_stop(config),
        Commands::Restart => {
            daemon::restart(&config).map(|_| println!("{}", "daemon restarted".green()))
        }
    }
}

fn open_engine(config: Config) -> anyhow::Result<Engram> {
    Ok(Engram::new(config)?)
}

fn run_stats(config: Config) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let stats = engine.stats()?;
    let metrics = engine.metrics_summary(None)?;

    println!("{}", "=== Engram Statistics ===".cyan().bold());
    println!();
    println!("{}: {}", "Total Memories".white().bold(), stats.total_memories);
    println!("{}: {}", "With Embeddings".white().bold(), stats.with_embeddings);
    println!("{}: {}", "Unscoped".white().bold(), stats.unscoped);
    println!(
        "{}: {:.1}%",
        "Average Strength".white().bold(),
        stats.average_strength * 100.0
    );

    if let Some(oldest) = stats.oldest_memory {
        println!(
            "{}: {}",
            "Oldest Memory".white().bold(),
            oldest.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(newest) = stats.newest_memory {
        println!(
            "{}: {}",
            "Newest Memory".white().bold(),
            newest.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("{}", "=== Session Metrics ===".yellow().bold());
    println!("{}: {}", "Remembers".white(), metrics.total_remembers);
    println!("{}: {}", "Recalls".white(), metrics.total_recalls);
    println!(
        "{}: {:.1}%",
        "Recall Hit Rate".white(),
        metrics.recall_hit_rate * 100.0
    );
    println!(
        "{}: {:.1}%",
        "Fallback Rate".white(),
        metrics.fallback_rate * 100.0
    );

    Ok(())
}

fn run_recent(config: Config, limit: usize) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let memories = engine.recent(limit)?;

    if memories.is_empty() {
        println!("{}", "No memories stored.".dimmed());
        return Ok(());
    }

    for memory in memories {
        print_memory_line(
            &memory.id,
            memory.category.as_deref(),
            memory.strength,
            &memory.content,
        );
    }
    Ok(())
}

fn run_search(
    config: Config,
    query: String,
    limit: usize,
    scope: Option<String>,
    category: Option<String>,
    min_strength: f64,
) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let result = engine.recall(RecallInput {
        query,
        limit,
        category,
        min_strength,
        scope_id: scope,
        ..Default::default()
    })?;

    if result.fallback_mode {
        println!("{}", "(recent-mode: empty query)".dimmed());
    }
    if result.results.is_empty() {
        println!("{}", "No matches.".dimmed());
        return Ok(());
    }

    for hit in result.results {
        println!(
            "{} {} {}",
            format!("[{:.3}]", hit.relevance).cyan(),
            hit.id.dimmed(),
            first_line(&hit.content)
        );
    }
    Ok(())
}

fn run_show(config: Config, id: String) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let Some(memory) = engine.get(&id)? else {
        eprintln!("{} {}", "Not found:".red().bold(), id);
        std::process::exit(1);
    };

    println!("{}: {}", "Id".white().bold(), memory.id);
    println!("{}: {}", "Content".white().bold(), memory.content);
    if let Some(category) = &memory.category {
        println!("{}: {}", "Category".white().bold(), category);
    }
    for (label, value) in [
        ("Scope", &memory.scope_id),
        ("Chat", &memory.chat_id),
        ("Thread", &memory.thread_id),
        ("Task", &memory.task_id),
    ] {
        if let Some(value) = value {
            println!("{}: {}", label.white().bold(), value);
        }
    }
    if let Some(metadata) = &memory.metadata {
        println!("{}: {}", "Metadata".white().bold(), metadata);
    }
    if let Some(key) = &memory.idempotency_key {
        println!("{}: {}", "Idempotency Key".white().bold(), key);
    }
    println!("{}: {:.3}", "Strength".white().bold(), memory.strength);
    println!("{}: {}", "Access Count".white().bold(), memory.access_count);
    println!(
        "{}: {}",
        "Created".white().bold(),
        memory.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "{}: {}",
        "Updated".white().bold(),
        memory.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "{}: {}",
        "Last Accessed".white().bold(),
        memory.last_accessed.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "{}: {}",
        "Embedding".white().bold(),
        if memory.embedding.is_some() { "yes" } else { "no" }
    );

    Ok(())
}

fn run_forget(config: Config, id: String, scope: Option<String>) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let outcome = engine.forget(ForgetInput {
        id,
        scope_id: scope,
        session_id: None,
    })?;

    if outcome.deleted {
        println!("{} {}", "Deleted".green().bold(), outcome.id);
    } else {
        println!("{} {}", "Not deleted (no matching row):".yellow(), outcome.id);
    }
    Ok(())
}

fn run_decay(config: Config, apply: bool) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let rows = engine.decay_preview()?;

    if rows.is_empty() {
        println!("{}", "No memories stored.".dimmed());
        return Ok(());
    }

    println!(
        "{:>8}  {:>9}  {:>6}  {}",
        "stored".bold(),
        "effective".bold(),
        "hits".bold(),
        "id".bold()
    );
    for row in &rows {
        let effective = format!("{:>9.3}", row.effective_strength);
        let colored_effective = if row.effective_strength < 0.1 {
            effective.red()
        } else if row.effective_strength < 0.5 {
            effective.yellow()
        } else {
            effective.green()
        };
        println!(
            "{:>8.3}  {}  {:>6}  {}",
            row.base_strength, colored_effective, row.access_count, row.id
        );
    }

    if apply {
        let applied = engine.decay_apply()?;
        println!();
        println!("{} {} memories", "Applied decay to".green().bold(), applied);
    }
    Ok(())
}

fn run_prune(config: Config, threshold: f64, dry_run: bool, yes: bool) -> anyhow::Result<()> {
    let engine = open_engine(config)?;
    let doomed: Vec<_> = engine
        .decay_preview()?
        .into_iter()
        .filter(|row| row.effective_strength < threshold)
        .collect();

    if doomed.is_empty() {
        println!(
            "Nothing below effective strength {}",
            format!("{:.2}", threshold).bold()
        );
        return Ok(());
    }

    println!(
        "{} memories below effective strength {:.2}",
        doomed.len().to_string().bold(),
        threshold
    );
    for row in &doomed {
        println!("  {:.3}  {}", row.effective_strength, row.id.dimmed());
    }

    if dry_run {
        println!("{}", "(dry run: nothing deleted)".dimmed());
        return Ok(());
    }

    if !yes {
        print!("Delete {} memories? [y/N] ", doomed.len());
        use std::io::Write;
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("{}", "Aborted.".yellow());
            return Ok(());
        }
    }

    let pruned = engine.prune(threshold)?;
    println!("{} {} memories", "Pruned".green().bold(), pruned);
    Ok(())
}

fn run_status(config: Config) -> anyhow::Result<()> {
    println!("{}", "=== Engram Status ===".cyan().bold());
    println!();

    match daemon::status(&config) {
        DaemonStatus::Running(pid) => {
            println!(
                "{}: {} (pid {}, http://{}:{})",
                "Daemon".white().bold(),
                "running".green().bold(),
                pid,
                config.http_host,
                config.http_port
            );
        }
        DaemonStatus::Stale(pid) => {
            println!(
                "{}: {} (stale pid file, pid {} is gone)",
                "Daemon".white().bold(),
                "stopped".red().bold(),
                pid
            );
        }
        DaemonStatus::Stopped => {
            println!("{}: {}", "Daemon".white().bold(), "stopped".red().bold());
        }
    }

    println!("{}: {}", "Database".white().bold(), config.db_path.display());

    let engine = open_engine(config)?;
    let stats = engine.stats()?;
    println!("{}: {}", "Memories".white().bold(), stats.total_memories);
    println!(
        "{}: {}",
        "Embedder".white().bold(),
        if engine.embedder_ready() {
            "ready".green()
        } else {
            "unavailable (FTS fallback)".yellow()
        }
    );

    let capabilities = engine.capabilities();
    println!(
        "{}: scopes={} idempotency={} context_hydration={} work_items={}",
        "Features".white().bold(),
        capabilities.scopes,
        capabilities.idempotency,
        capabilities.context_hydration,
        capabilities.work_items
    );

    Ok(())
}

fn run_serve(config: Config) -> anyhow::Result<()> {
    let pid_path = config.pid_path();
    let host = config.http_host.clone();
    let port = config.http_port;

    let engine = Arc::new(Engram::new(config)?);
    daemon::write_pid_file(&pid_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(http::run(engine, &host, port));

    daemon::remove_pid_file(&pid_path);
    result
}

fn run_stop(config: Config) -> anyhow::Result<()> {
    if daemon::stop(&config)? {
        println!("{}", "daemon stopped".green());
    } else {
        println!("{}", "daemon was not running".yellow());
    }
    Ok(())
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or(content)
}

fn print_memory_line(id: &str, category: Option<&str>, strength: f64, content: &str) {
    let tag = category.unwrap_or("-");
    println!(
        "{} {} {} {}",
        format!("[{:.2}]", strength).cyan(),
        format!("({})", tag).magenta(),
        id.dimmed(),
        first_line(content)
    );
}
