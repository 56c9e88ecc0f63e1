//! # convos CLI
//!
//! The `convos` binary syncs AI assistant conversations into a local SQLite
//! archive and searches, lists and prints them.
//!
//! ## Usage
//!
//! ```bash
//! convos [--config ./convos.toml] [-v] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `convos init` | Create the database, run migrations, build the index |
//! | `convos sync` | Ingest changed local logs, imports and hosted sources |
//! | `convos search "<query>"` | Ranked full-text search over messages |
//! | `convos list` | Recent conversations |
//! | `convos show <prefix>` | One conversation in full |
//! | `convos get <prefix>` | Page through a conversation's messages |
//! | `convos export <path>` | Write the archive as JSON or CSV |
//! | `convos doctor` | Diagnose paths, database and credentials |
//! | `convos stats` | Archive statistics |
//! | `convos tools [query]` | Recent tool calls |
//! | `convos edits [path]` | Recent file edits |
//! | `convos import <path>` | Ingest one export file or log directory |
//!
//! ## Environment
//!
//! - `CONVOS_PROJECT_ROOT`: where the database and `convos.toml` live.
//! - `CONVOS_IMPORT_PATHS`: comma-separated extra paths to ingest on sync.
//! - `CONVOS_CHATGPT_TOKEN`, `CONVOS_CHATGPT_COOKIE`, `CONVOS_CLAUDE_COOKIE`:
//!   hosted source credentials.
//! - `RUST_LOG`: log filter; overrides `-v`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use convos::config::{self, Config, ConfigOrigin};
use convos::error::exit_code_for;
use convos::models::{Role, Source};
use convos::query::ListFilters;
use convos::search::SearchFilters;
use convos::{db, doctor, export, get, index, list, search, stats, sync};

/// convos: a local-first searchable archive of AI assistant conversations.
#[derive(Parser)]
#[command(
    name = "convos",
    about = "A local-first searchable archive of AI assistant conversations",
    version,
    long_about = "convos normalizes ChatGPT, Claude.ai, Claude Code and Codex conversations \
    into one SQLite archive with deterministic ids, idempotent re-syncs and full-text search."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `<project-root>/convos.toml` when present, otherwise
    /// built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and search index.
    ///
    /// Idempotent: running it again leaves existing data alone.
    Init,

    /// Ingest new and changed conversations from every configured source.
    Sync {
        /// Keep syncing every interval until Ctrl-C.
        #[arg(short, long)]
        watch: bool,

        /// Seconds between cycles in watch mode.
        #[arg(short, long)]
        interval: Option<u64>,

        /// Skip ChatGPT and Claude.ai.
        #[arg(long)]
        no_hosted: bool,
    },

    /// Full-text search over message content and reasoning.
    Search {
        /// Search terms; every term must match.
        query: String,

        /// Maximum number of results.
        #[arg(short = 'n', long)]
        limit: Option<i64>,

        /// Snippet width in characters.
        #[arg(short = 'c', long)]
        context: Option<usize>,

        /// Restrict to a source (repeatable).
        #[arg(short, long = "source")]
        sources: Vec<Source>,

        /// Only messages from the last N days.
        #[arg(short, long)]
        days: Option<i64>,

        /// Restrict to a role (repeatable).
        #[arg(short, long = "role")]
        roles: Vec<Role>,

        /// Only messages with reasoning, and print it.
        #[arg(long)]
        thinking: bool,
    },

    /// List conversations, newest first.
    List {
        #[arg(short = 'n', long)]
        limit: Option<i64>,

        #[arg(short, long = "source")]
        sources: Vec<Source>,

        /// Only conversations from the last N days.
        #[arg(short, long)]
        days: Option<i64>,

        /// Working directory substring.
        #[arg(long)]
        cwd: Option<String>,
    },

    /// Print one conversation.
    Show {
        /// Conversation id or unique prefix.
        id: String,

        /// Include tool calls.
        #[arg(short, long)]
        tools: bool,

        /// Include reasoning text.
        #[arg(long)]
        thinking: bool,
    },

    /// Print a conversation's messages, optionally from a point onward.
    Get {
        /// Conversation id or unique prefix.
        id: String,

        /// Only messages created after this timestamp.
        #[arg(long)]
        since: Option<String>,

        /// Only messages after this message id prefix.
        #[arg(long)]
        after: Option<String>,

        #[arg(short = 'n', long)]
        limit: Option<i64>,

        #[arg(long)]
        thinking: bool,
    },

    /// Export conversations to a file.
    Export {
        output: PathBuf,

        /// `json` or `csv`.
        #[arg(short, long, default_value = "json")]
        format: String,

        #[arg(short, long)]
        source: Option<Source>,
    },

    /// Check paths, database and credentials.
    Doctor {
        /// Send a request to each hosted source.
        #[arg(long)]
        probe: bool,
    },

    /// Show archive statistics.
    Stats,

    /// Recent tool calls, optionally matching a substring.
    Tools {
        query: Option<String>,

        #[arg(short = 'n', long, default_value_t = 30)]
        limit: i64,
    },

    /// Recent file edits, optionally matching a path substring.
    Edits {
        path: Option<String>,

        #[arg(short = 'n', long, default_value_t = 30)]
        limit: i64,
    },

    /// Ingest one export file or session log directory.
    Import {
        path: PathBuf,

        /// Override source detection.
        #[arg(short, long)]
        source: Option<Source>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "convos=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, cfg: &Config, origin: &ConfigOrigin) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            let store = db::connect(cfg).await?;
            index::rebuild(&store).await?;
            store.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Sync {
            watch,
            interval,
            no_hosted,
        } => {
            sync::run_sync(cfg, watch, interval, !no_hosted).await?;
        }
        Commands::Search {
            query,
            limit,
            context,
            sources,
            days,
            roles,
            thinking,
        } => {
            let filters = SearchFilters {
                sources,
                days,
                roles,
                thinking: thinking.then_some(true),
            };
            search::run_search(cfg, &query, &filters, limit, context, thinking).await?;
        }
        Commands::List {
            limit,
            sources,
            days,
            cwd,
        } => {
            let filters = ListFilters {
                sources,
                days,
                cwd,
                limit: limit.unwrap_or(0),
            };
            list::run_list(cfg, filters).await?;
        }
        Commands::Show {
            id,
            tools,
            thinking,
        } => {
            get::run_show(cfg, &id, tools, thinking).await?;
        }
        Commands::Get {
            id,
            since,
            after,
            limit,
            thinking,
        } => {
            get::run_get(cfg, &id, since.as_deref(), after, limit, thinking).await?;
        }
        Commands::Export {
            output,
            format,
            source,
        } => {
            export::run_export(cfg, &output, &format, source).await?;
        }
        Commands::Doctor { probe } => {
            doctor::run_doctor(cfg, origin, probe).await?;
        }
        Commands::Stats => {
            stats::run_stats(cfg).await?;
        }
        Commands::Tools { query, limit } => {
            list::run_tools(cfg, query.as_deref(), limit).await?;
        }
        Commands::Edits { path, limit } => {
            list::run_edits(cfg, path.as_deref(), limit).await?;
        }
        Commands::Import { path, source } => {
            sync::run_import(cfg, &path, source).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match config::resolve_config(cli.config.as_deref()) {
        Ok((cfg, origin)) => run(cli.command, &cfg, &origin).await,
        Err(e) => Err(e),
    };

    if let Err(err) = outcome {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}
