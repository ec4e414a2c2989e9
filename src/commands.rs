//! CLI command implementations.
//!
//! Each `run_*` function backs one `lejechat` subcommand and prints plain
//! text to stdout. Logs go to stderr (see [`crate::logging`]).

use anyhow::{bail, Result};
use futures_util::StreamExt;
use std::io::Write;
use std::path::Path;

use crate::config::Config;
use crate::import::{import_site, load_pages, ImportRequest};
use crate::index::open_index;
use crate::llm::ProviderChain;
use crate::models::{SiteIndexMetadata, Source};
use crate::pipeline::QueryRequest;
use crate::server::AppState;
use crate::storage::{select_backend, StorageOutcome};
use crate::stream::LineEvent;

fn print_sources(sources: &[Source]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, s) in sources.iter().enumerate() {
        println!("  {}. {} ({})", i + 1, s.title, s.url);
    }
}

/// Answer a question from the terminal, optionally printing fragments as
/// they arrive.
pub async fn run_ask(config: &Config, namespace: &str, query: &str, stream: bool) -> Result<()> {
    let state = AppState::from_config(config)?;
    let request = QueryRequest {
        query: query.to_string(),
        namespace: namespace.to_string(),
    };

    if !stream {
        let answer = state.pipeline().answer(&request).await;
        println!("{}", answer.answer);
        print_sources(&answer.sources);
        return Ok(());
    }

    let mut events = state.pipeline().answer_stream(&request).await.into_events();
    let mut sources = Vec::new();
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            LineEvent::Sources(s) => sources = s,
            LineEvent::Text(fragment) => {
                print!("{}", fragment);
                stdout.flush()?;
            }
        }
    }
    println!();
    print_sources(&sources);
    Ok(())
}

/// Import crawler output for `url` from a JSON file.
pub async fn run_import(config: &Config, url: &str, pages_path: &Path) -> Result<()> {
    let pages = load_pages(pages_path)?;
    let index = open_index(&config.index)?;
    let storage = select_backend(&config.storage)?;

    let report = import_site(
        index.as_ref(),
        &storage,
        ImportRequest {
            url: url.to_string(),
            pages,
            timestamp: chrono::Utc::now(),
        },
    )
    .await?;

    println!("Imported {} pages from {}", report.documents, url);
    println!("  namespace: {}", report.namespace);
    println!("  batches:   {}", report.batches);
    if !report.metadata_saved {
        println!("  warning: site metadata could not be saved");
    }
    Ok(())
}

pub async fn run_list_indexes(config: &Config) -> Result<()> {
    let storage = select_backend(&config.storage)?;
    let indexes = storage.get_indexes().await;

    if indexes.is_empty() {
        println!("No indexes.");
        return Ok(());
    }

    println!("{:<40} {:>6}  {:<24} URL", "NAMESPACE", "PAGES", "CREATED");
    for index in &indexes {
        println!(
            "{:<40} {:>6}  {:<24} {}",
            index.namespace, index.pages_crawled, index.created_at, index.url
        );
    }
    Ok(())
}

fn print_index(index: &SiteIndexMetadata) {
    println!("namespace: {}", index.namespace);
    println!("slug:      {}", index.slug);
    println!("url:       {}", index.url);
    println!("pages:     {}", index.pages_crawled);
    println!("created:   {}", index.created_at);
    if let Some(title) = &index.metadata.title {
        println!("title:     {}", title);
    }
    if let Some(description) = &index.metadata.description {
        println!("description: {}", description);
    }
    println!("quick prompts:");
    for prompt in &index.metadata.quick_prompts {
        println!("  - {}", prompt);
    }
}

pub async fn run_show_index(config: &Config, namespace: &str) -> Result<()> {
    let storage = select_backend(&config.storage)?;
    match storage.get_index(namespace).await {
        Some(index) => {
            print_index(&index);
            Ok(())
        }
        None => bail!("index not found: {}", namespace),
    }
}

pub async fn run_delete_index(config: &Config, namespace: &str) -> Result<()> {
    let storage = select_backend(&config.storage)?;
    match storage.delete_index(namespace).await {
        StorageOutcome::Failed(e) => bail!("failed to delete {}: {}", namespace, e),
        _ => {
            println!("Deleted {}", namespace);
            Ok(())
        }
    }
}

pub async fn run_set_prompts(config: &Config, namespace: &str, prompts: &[String]) -> Result<()> {
    let storage = select_backend(&config.storage)?;
    match storage.update_quick_prompts(namespace, prompts).await {
        StorageOutcome::Saved => {}
        StorageOutcome::Missing => bail!("index not found: {}", namespace),
        StorageOutcome::Failed(e) => bail!("failed to update {}: {}", namespace, e),
    }
    if let Some(index) = storage.get_index(namespace).await {
        print_index(&index);
    }
    Ok(())
}

/// Print providers in rank order with their availability.
pub fn run_providers(config: &Config) -> Result<()> {
    let summary = ProviderChain::from_config(&config.ai)?.summary();

    println!("{:<12} {:<44} STATUS", "PROVIDER", "MODEL");
    for p in &summary.providers {
        let status = if summary.active.as_deref() == Some(p.name.as_str()) {
            "ACTIVE"
        } else if p.available {
            "AVAILABLE"
        } else {
            "NO KEY"
        };
        println!("{:<12} {:<44} {}", p.name, p.model, status);
    }
    Ok(())
}
