use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use tunecast_core::{
    ActivityKind, AppConfig, CoreError, OwnerScope, PodcastSubmission, SqliteCatalogStore,
};
use tunecast_ingest::{CatalogPipeline, IngestError, normalize_submission};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "tunecast",
    about = "Podcast and track catalog ingestion with per-user dedup",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/tunecast/config.toml or $TUNECAST_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Acting user. Also read from TUNECAST_OWNER.
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Compact JSON envelope on one line (for scripts).
    /// Also enabled by setting TUNECAST_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search podcasts, with each result's episodes attached.
    Search {
        query: String,
        #[arg(long)]
        page: Option<u32>,
    },

    /// Curated best-podcasts listing.
    Best {
        #[arg(long)]
        page: Option<u32>,
    },

    /// Search tracks for each query and keep the ones not recommended before.
    Recommend {
        #[arg(required = true)]
        queries: Vec<String>,
    },

    /// List previously recommended tracks.
    Recommended {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Save a podcast, from a JSON submission file or from flags.
    Save {
        /// JSON file holding `{id, title, publisher, image_url, episodes}`.
        #[arg(long, conflicts_with_all = ["id", "title"])]
        file: Option<PathBuf>,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        publisher: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },

    /// Pull the newest episode of a saved podcast and list its episodes.
    Refresh { podcast_id: String },

    /// List saved podcasts.
    Saved,

    /// Record that an episode or track was played.
    Play {
        /// `episode` or `track`.
        kind: ActivityKind,
        item_id: String,
        /// Podcast id; required for episodes.
        #[arg(long)]
        container: Option<String>,
        #[arg(long)]
        progress: Option<i64>,
    },

    /// Activity history, newest first.
    History { kind: ActivityKind },
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tunecast=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("TUNECAST_JSON").as_deref() == Ok("1");

    match run(cli, json_output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            error!("{err:#}");
            if json_output {
                let body = serde_json::json!({
                    "status": "error",
                    "code": status_of(&err),
                    "message": format!("{err:#}"),
                });
                println!("{body}");
            }
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli, json_output: bool) -> Result<()> {
    let start = Instant::now();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("loading config")?;

    let store = Arc::new(open_store(&config.database_path())?);
    let pipeline = CatalogPipeline::from_config(&config, store)?;
    let out = Output {
        json: json_output,
        start,
    };

    match cli.command {
        Commands::Search { query, page } => {
            let results = pipeline.search_podcasts(&query, page).await?;
            out.emit(&results)?;
        }

        Commands::Best { page } => {
            let results = pipeline.best_podcasts(page).await?;
            out.emit(&results)?;
        }

        Commands::Recommend { queries } => {
            let owner = owner(cli.owner)?;
            let report = pipeline.recommend_tracks(&owner, &queries).await?;
            out.emit(&report)?;
        }

        Commands::Recommended { page, limit } => {
            let owner = owner(cli.owner)?;
            let tracks = pipeline.previously_recommended(&owner, page, limit)?;
            out.emit(&tracks)?;
        }

        Commands::Save {
            file,
            id,
            title,
            publisher,
            image,
        } => {
            let owner = owner(cli.owner)?;
            let submission = match file {
                Some(path) => read_submission(&path)?,
                None => PodcastSubmission {
                    id,
                    title,
                    publisher,
                    image_url: image,
                    episodes: Vec::new(),
                },
            };
            let report = pipeline.save_podcast(&owner, submission)?;
            out.emit(&report)?;
        }

        Commands::Refresh { podcast_id } => {
            let owner = owner(cli.owner)?;
            let podcast = pipeline.refresh_saved_podcast(&owner, &podcast_id).await?;
            out.emit(&podcast)?;
        }

        Commands::Saved => {
            let owner = owner(cli.owner)?;
            out.emit(&pipeline.saved_podcasts(&owner)?)?;
        }

        Commands::Play {
            kind,
            item_id,
            container,
            progress,
        } => {
            let owner = owner(cli.owner)?;
            let entry = pipeline.record_activity(&owner, kind, container, &item_id, progress)?;
            out.emit(&entry)?;
        }

        Commands::History { kind } => {
            let owner = owner(cli.owner)?;
            out.emit(&pipeline.activity_history(&owner, kind)?)?;
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

struct Output {
    json: bool,
    start: Instant,
}

impl Output {
    fn emit<T: Serialize>(&self, data: &T) -> Result<()> {
        if self.json {
            let body = serde_json::json!({
                "status": "ok",
                "data": data,
                "meta": { "duration_ms": self.start.elapsed().as_millis() },
            });
            println!("{}", serde_json::to_string(&body)?);
        } else {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        Ok(())
    }
}

fn owner(flag: Option<String>) -> Result<OwnerScope> {
    let raw = flag
        .or_else(|| std::env::var("TUNECAST_OWNER").ok())
        .unwrap_or_default();
    Ok(OwnerScope::new(raw).map_err(IngestError::from)?)
}

fn open_store(db_path: &Path) -> Result<SqliteCatalogStore> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(SqliteCatalogStore::open(db_path)?)
}

fn read_submission(path: &Path) -> Result<PodcastSubmission> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| IngestError::Validation(format!("{}: {e}", path.display())))?;
    Ok(normalize_submission(&payload))
}

fn status_of(err: &anyhow::Error) -> u16 {
    if let Some(err) = err.downcast_ref::<IngestError>() {
        return err.status_code();
    }
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::Validation(_)) => 400,
        Some(CoreError::NotFound(_)) => 404,
        _ => 500,
    }
}

/// 2 bad input, 3 not found, 4 upstream failure, 5 deadline, 1 anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    match status_of(err) {
        400 => 2,
        404 => 3,
        502 => 4,
        504 => 5,
        _ => 1,
    }
}
