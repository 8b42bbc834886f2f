mod client;
mod config;
mod db;
mod digest;
mod error;
mod fetch;
mod node;
mod sink;
mod source;

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::client::StoryblokClient;
use crate::config::SourceOptions;
use crate::sink::{JsonLinesSink, LogStatus, NodeSink, NodeStore, ProgressSink, StatusSink};

#[derive(Parser)]
#[command(name = "storyblok_source", about = "Source Storyblok content into content-graph nodes")]
struct Cli {
    /// Config file (default: ./storyblok.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch stories, tags and datasource entries and store them as nodes
    Sync {
        /// Content version: draft or published
        #[arg(long)]
        version: Option<String>,
        /// Datasource to fetch (repeatable; replaces configured list)
        #[arg(short = 'd', long = "data-source")]
        data_sources: Vec<String>,
        /// Fail a collection that still has pages after this many requests
        #[arg(long)]
        max_pages: Option<u32>,
        /// Fail on duplicate node ids
        #[arg(long)]
        unique_ids: bool,
        /// Print nodes as JSON lines instead of storing them
        #[arg(long)]
        dry_run: bool,
        /// SQLite database path
        #[arg(long = "db")]
        db_path: Option<PathBuf>,
    },
    /// Node counts by type and last fetch time
    Stats {
        #[arg(long = "db", default_value = "data/storyblok.sqlite")]
        db_path: PathBuf,
    },
    /// Stored nodes table
    Nodes {
        /// Filter by node type (e.g. StoryblokTag)
        #[arg(short = 't', long = "type")]
        node_type: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        #[arg(long = "db", default_value = "data/storyblok.sqlite")]
        db_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Sync {
            version,
            data_sources,
            max_pages,
            unique_ids,
            dry_run,
            db_path,
        } => {
            let mut options = SourceOptions::load(cli.config.as_deref())?;
            if let Some(v) = version {
                options.version = v;
            }
            if !data_sources.is_empty() {
                options.data_sources = data_sources;
            }
            if max_pages.is_some() {
                options.max_pages = max_pages;
            }
            if unique_ids {
                options.check_unique_ids = true;
            }
            if let Some(p) = db_path {
                options.db_path = p;
            }
            options.validate()?;
            sync(&options, dry_run).await
        }
        Commands::Stats { db_path } => {
            let conn = db::connect(&db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Nodes:        {}", s.total);
            for (node_type, count) in &s.by_type {
                println!("  {:<26} {}", node_type, count);
            }
            match s
                .last_fetched
                .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
            {
                Some(at) => println!("Last fetched: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("Last fetched: never"),
            }
            Ok(())
        }
        Commands::Nodes {
            node_type,
            limit,
            db_path,
        } => {
            let conn = db::connect(&db_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_overview(&conn, node_type.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No nodes found. Run 'sync' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<40} | {:<24} | {:<32} | {:<19}",
                "#", "Id", "Type", "Digest", "Stored"
            );
            println!("{}", "-".repeat(130));
            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<40} | {:<24} | {:<32} | {:<19}",
                    i + 1,
                    truncate(&r.id, 40),
                    r.node_type,
                    r.content_digest,
                    r.created_at
                );
            }
            println!("\n{} nodes", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn sync(options: &SourceOptions, dry_run: bool) -> anyhow::Result<()> {
    let client = StoryblokClient::new(&options.access_token, &options.api_base, options.timeout())?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} nodes")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    let report = if dry_run {
        let out = JsonLinesSink::new(std::io::stdout());
        let report = {
            let sink = ProgressSink::new(&out, pb.clone());
            source::source_nodes(&client, &sink, &LogStatus, options).await
        };
        out.into_inner()?.flush()?;
        report
    } else {
        let conn = db::connect(&options.db_path)?;
        db::init_schema(&conn)?;
        let store = NodeStore::new(conn);
        let sink = ProgressSink::new(&store as &dyn NodeSink, pb.clone());
        source::source_nodes(&client, &sink, &store as &dyn StatusSink, options).await
    };
    pb.finish_and_clear();

    let report = report.context("Sync failed")?;
    for c in &report.collections {
        info!(collection = %c.label, node_type = c.type_name, nodes = c.nodes, "collection done");
    }
    eprintln!(
        "Created {} nodes from {} collections.",
        report.total_nodes(),
        report.collections.len()
    );
    if !dry_run {
        eprintln!("Database: {}", options.db_path.display());
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
