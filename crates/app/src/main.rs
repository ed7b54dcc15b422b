use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use revguard_core::{JsonFileStore, PipelineConfig, SearchCoordinator, SearchQuery, SkippedFile};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "revguard", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON pipeline config; missing fields keep their defaults.
    #[arg(long, env = "REVGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding documents, chunks and comparison reports.
    #[arg(long, env = "REVGUARD_STORAGE", default_value = ".revguard")]
    storage_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest files, or every supported file below a folder.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Rank stored chunks against a query and print them with citations.
    Search {
        query: String,
        /// Number of results; defaults to `search.default_top_k`.
        #[arg(long)]
        top_k: Option<usize>,
        /// Restrict to these document ids (repeatable).
        #[arg(long = "document")]
        documents: Vec<String>,
    },
    /// Compare revision tags and tolerances across 2-3 stored documents.
    Compare {
        #[arg(num_args = 2..=3, required = true)]
        document_ids: Vec<String>,
    },
    /// Print one stored document, or list all of them.
    Show {
        document_id: Option<String>,
        /// Include chunk records.
        #[arg(long, default_value_t = false)]
        chunks: bool,
    },
    /// Delete a document with its chunks and vectors.
    Delete { document_id: String },
    /// Print a stored mismatch.
    Mismatch { mismatch_id: String },
    /// Print a stored comparison report.
    Report { report_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "revguard boot"
    );

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let store = JsonFileStore::open(&cli.storage_dir)
        .await
        .with_context(|| format!("opening storage {}", cli.storage_dir.display()))?;
    let coordinator = SearchCoordinator::open(store, config).await?;

    match cli.command {
        Command::Ingest { paths } => {
            let mut ingested = Vec::new();
            let mut skipped = Vec::new();
            for path in paths {
                if path.is_dir() {
                    let report = coordinator.ingest_folder(&path).await?;
                    ingested.extend(report.ingested);
                    skipped.extend(report.skipped);
                    continue;
                }
                match coordinator.ingest_path(&path).await {
                    Ok(outcome) => ingested.push(outcome),
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "skipping document");
                        skipped.push(SkippedFile {
                            reason: error.to_string(),
                            path,
                        });
                    }
                }
            }
            print_json(&json!({ "ingested": ingested, "skipped": skipped }))?;
        }
        Command::Search {
            query,
            top_k,
            documents,
        } => {
            let top_k = top_k.unwrap_or(coordinator.config().search.default_top_k);
            let mut search_query = SearchQuery::new(query, top_k);
            if !documents.is_empty() {
                search_query = search_query.within(documents);
            }
            let results = coordinator.search(&search_query).await?;
            print_json(&results)?;
        }
        Command::Compare { document_ids } => {
            let report = coordinator.compare(&document_ids).await?;
            print_json(&report)?;
        }
        Command::Show {
            document_id: Some(document_id),
            chunks,
        } => {
            let stored = coordinator
                .document(&document_id)
                .await?
                .with_context(|| format!("unknown document {document_id}"))?;
            if chunks {
                print_json(&stored)?;
            } else {
                print_json(&stored.document)?;
            }
        }
        Command::Show {
            document_id: None, ..
        } => {
            print_json(&coordinator.documents().await?)?;
        }
        Command::Delete { document_id } => {
            let deleted = coordinator.delete_document(&document_id).await?;
            print_json(&json!({ "document_id": document_id, "deleted": deleted }))?;
        }
        Command::Mismatch { mismatch_id } => {
            let mismatch = coordinator
                .mismatch(&mismatch_id)
                .await?
                .with_context(|| format!("unknown mismatch {mismatch_id}"))?;
            print_json(&mismatch)?;
        }
        Command::Report { report_id } => {
            let report = coordinator
                .report(&report_id)
                .await?
                .with_context(|| format!("unknown report {report_id}"))?;
            print_json(&report)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
