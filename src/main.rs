//! # Lejechat CLI (`lejechat`)
//!
//! ## Usage
//!
//! ```bash
//! lejechat --config ./config/lejechat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lejechat serve` | Start the HTTP server |
//! | `lejechat ask <namespace> "<question>"` | Answer a question about one site |
//! | `lejechat import <url> --pages <file.json>` | Index already-crawled pages |
//! | `lejechat indexes list` | List recorded sites |
//! | `lejechat indexes show <namespace>` | Show one site's metadata |
//! | `lejechat indexes delete <namespace>` | Forget a site's metadata |
//! | `lejechat prompts set <namespace> <p1> <p2> <p3>` | Replace quick prompts |
//! | `lejechat providers` | Show language-model providers and which one is active |
//!
//! ## Examples
//!
//! ```bash
//! # Index a crawl of a rental site
//! lejechat import https://udlejning.dk --pages ./crawl.json
//!
//! # Ask a question and stream the answer
//! lejechat ask udlejning-dk-1700000000000 "Hvad er depositum?" --stream
//!
//! # Serve both endpoints
//! lejechat serve --config ./config/lejechat.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lejechat::{commands, config, logging, server};

/// Lejechat: question answering over imported websites.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file at the default path falls back to built-in defaults
/// plus environment variables.
#[derive(Parser)]
#[command(
    name = "lejechat",
    about = "Lejechat: site-scoped question answering with retrieval-grounded language models",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lejechat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Answer a question about one imported site.
    Ask {
        /// Namespace of the site (see `lejechat indexes list`).
        namespace: String,
        /// The question.
        query: String,
        /// Print the answer incrementally as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Index pages produced by a crawler.
    ///
    /// The pages file is a JSON array of pages or a crawl result object with
    /// a `data` array. Every import creates a new namespace.
    Import {
        /// The site's root URL; its hostname names the namespace.
        url: String,
        /// Path to the crawler's JSON output.
        #[arg(long)]
        pages: PathBuf,
    },

    /// Inspect or remove recorded sites.
    Indexes {
        #[command(subcommand)]
        action: IndexesAction,
    },

    /// Manage a site's quick prompts.
    Prompts {
        #[command(subcommand)]
        action: PromptsAction,
    },

    /// List language-model providers in rank order.
    Providers,
}

#[derive(Subcommand)]
enum IndexesAction {
    /// List all recorded sites, newest first.
    List,
    /// Show one site's metadata.
    Show { namespace: String },
    /// Delete one site's metadata. Indexed documents are left in place.
    Delete { namespace: String },
}

#[derive(Subcommand)]
enum PromptsAction {
    /// Replace the quick prompts. Blank entries are backfilled with defaults.
    Set {
        namespace: String,
        #[arg(num_args = 1..=3, required = true)]
        prompts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_path = cli.config == PathBuf::from("./config/lejechat.toml");
    let cfg = config::load_config(&cli.config, !default_path)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            namespace,
            query,
            stream,
        } => {
            commands::run_ask(&cfg, &namespace, &query, stream).await?;
        }
        Commands::Import { url, pages } => {
            commands::run_import(&cfg, &url, &pages).await?;
        }
        Commands::Indexes { action } => match action {
            IndexesAction::List => commands::run_list_indexes(&cfg).await?,
            IndexesAction::Show { namespace } => {
                commands::run_show_index(&cfg, &namespace).await?
            }
            IndexesAction::Delete { namespace } => {
                commands::run_delete_index(&cfg, &namespace).await?
            }
        },
        Commands::Prompts { action } => match action {
            PromptsAction::Set { namespace, prompts } => {
                commands::run_set_prompts(&cfg, &namespace, &prompts).await?;
            }
        },
        Commands::Providers => {
            commands::run_providers(&cfg)?;
        }
    }

    Ok(())
}
