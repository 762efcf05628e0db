use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use docqa_core::config::Config;
use docqa_rag::loader::list_documents;
use docqa_rag::{AskOutcome, PostProcessOption, ProcessOutcome, Workspace};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Commands::Options = cli.command {
        handle_options();
        return Ok(());
    }

    let settings = Config::load()
        .and_then(|c| c.settings())
        .context("loading configuration")?;
    let workspace = Workspace::from_settings(&settings).context("opening workspace")?;

    match cli.command {
        Commands::Ingest { paths } => handle_ingest(&workspace, paths).await?,
        Commands::Ask { query, k } => handle_ask(&workspace, &query, k.unwrap_or(workspace.default_k())).await?,
        Commands::Process { filename, option, k } => {
            let option: PostProcessOption = option.parse()?;
            handle_process(&workspace, &filename, option, k.unwrap_or(workspace.default_k())).await?;
        }
        Commands::Docs => handle_docs(&workspace),
        Commands::Delete { id } => handle_delete(&workspace, &id).await?,
        Commands::Reset => {
            workspace.reset().await?;
            println!("🗑️  Index reset");
        }
        Commands::Options => handle_options(),
    }
    Ok(())
}

async fn handle_ingest(workspace: &Workspace, paths: Vec<PathBuf>) -> Result<()> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(list_documents(&path));
        } else {
            files.push(path);
        }
    }
    if files.is_empty() {
        println!("No supported documents found");
        return Ok(());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );
    let mut failed = 0usize;
    let mut added = 0usize;
    for file in &files {
        pb.set_message(file.display().to_string());
        match workspace.ingest_file(file).await {
            Ok(report) => added += report.chunks_added,
            Err(e) => {
                failed += 1;
                pb.println(format!("⚠️  {}: {e}", file.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    println!(
        "✅ Ingested {} of {} files ({added} chunks, {} in index)",
        files.len() - failed,
        files.len(),
        workspace.index().count()
    );
    if failed > 0 {
        anyhow::bail!("{failed} file(s) could not be ingested");
    }
    Ok(())
}

async fn handle_ask(workspace: &Workspace, query: &str, k: usize) -> Result<()> {
    match workspace.ask(query, k).await? {
        AskOutcome::NoIndex => println!("No index available. Ingest documents first."),
        AskOutcome::Answered(answer) => {
            println!("{}", answer.answer);
            println!("\n📚 Sources: {}", answer.sources.join(", "));
        }
    }
    Ok(())
}

async fn handle_process(workspace: &Workspace, filename: &str, option: PostProcessOption, k: usize) -> Result<()> {
    match workspace.process(filename, option, k).await? {
        ProcessOutcome::NoIndex => println!("No index available. Ingest documents first."),
        ProcessOutcome::Processed(result) => {
            println!("== {} ({}) ==\n", result.label, result.filename);
            println!("{}", result.result);
            if !result.sources.is_empty() {
                let sources: Vec<String> = result
                    .sources
                    .iter()
                    .map(|(source, page)| match page {
                        Some(p) => format!("{source} p.{p}"),
                        None => source.clone(),
                    })
                    .collect();
                println!("\n📚 Sources: {}", sources.join(", "));
            }
        }
    }
    Ok(())
}

fn handle_docs(workspace: &Workspace) {
    let docs = workspace.documents();
    if docs.is_empty() {
        println!("No documents indexed");
        return;
    }
    for doc in &docs {
        println!("  {:>6} chunks  {}", doc.chunks, doc.name);
    }
    let stats = workspace.index().stats();
    println!("\n📊 {} documents, {} chunks, dim {}", docs.len(), stats.chunks, stats.dim);
    if !stats.is_aligned() {
        println!("⚠️  index holds {} vectors for {} chunks; delete or reset to repair", stats.vectors, stats.chunks);
    }
}

async fn handle_delete(workspace: &Workspace, id: &str) -> Result<()> {
    let ticket = workspace.delete_document(id).await?;
    let name = ticket.name().to_string();
    if !ticket.raw_file_removed() {
        println!("No stored file for {name}");
    }
    // the process would otherwise exit before the cleanup finishes
    let removed = ticket.wait().await?;
    println!("🗑️  Deleted {name} ({removed} chunks removed)");
    Ok(())
}

fn handle_options() {
    for option in PostProcessOption::ALL {
        println!("  {:<14} {}", option.key(), option.label());
    }
}
