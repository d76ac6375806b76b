//! Pradera command-line client
//!
//! Usage:
//!   # Print a flow as an editor document
//!   pradera project 12
//!
//!   # Save an edited document back into its flow
//!   pradera reconcile --flow 12 --document edited.json
//!   pradera reconcile --flow 12 --document edited.json --dry-run
//!
//!   # Store the document state of a flow without touching its blocks
//!   pradera upload --flow 12 --document edited.json
//!
//!   # Browse
//!   pradera flows --user 3
//!   pradera search "opening line"
//!
//! The store comes from the config file named by `--config` or
//! `$PRADERA_CONFIG`; without one, an empty in-memory store is used.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pradera_client::{
    BlockStore, FlowStore, PraderaConfig, SessionEvent, Stores, load_snapshot, spawn_session,
};
use pradera_doc::{Document, reconcile};
use pradera_types::{FlowId, UserId};

#[derive(Parser, Debug)]
#[command(name = "pradera")]
#[command(about = "Edit Pradera flows as documents")]
struct Args {
    /// RON config file (falls back to $PRADERA_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the document projected from a flow
    Project {
        #[arg(value_parser = FlowId::parse)]
        flow: FlowId,
    },
    /// Apply an edited document to its flow
    Reconcile {
        #[arg(long, value_parser = FlowId::parse)]
        flow: FlowId,
        /// Editor document as JSON
        #[arg(long)]
        document: PathBuf,
        /// Print the mutations instead of applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Upload a document as the flow's document state
    Upload {
        #[arg(long, value_parser = FlowId::parse)]
        flow: FlowId,
        #[arg(long)]
        document: PathBuf,
    },
    /// List the flows of a user
    Flows {
        #[arg(long, value_parser = UserId::parse)]
        user: UserId,
    },
    /// Full-text search over block content
    Search { query: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = PraderaConfig::discover(args.config.as_deref()).context("loading config")?;
    let stores = config.open_stores()?;

    match args.command {
        Command::Project { flow } => cmd_project(&stores, flow).await,
        Command::Reconcile {
            flow,
            document,
            dry_run: true,
        } => cmd_dry_run(&config, &stores, flow, &document).await,
        Command::Reconcile {
            flow,
            document,
            dry_run: false,
        } => cmd_reconcile(&config, stores, flow, &document).await,
        Command::Upload { flow, document } => cmd_upload(&stores, flow, &document).await,
        Command::Flows { user } => cmd_flows(&stores, user).await,
        Command::Search { query } => cmd_search(&stores, &query).await,
    }
}

fn read_document(path: &Path) -> Result<Document> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Document::from_json(&json).with_context(|| format!("decoding {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_project(stores: &Stores, flow: FlowId) -> Result<()> {
    let snapshot = load_snapshot(stores.blocks.as_ref(), stores.flows.as_ref(), flow).await?;
    print_json(&snapshot.project())
}

async fn cmd_dry_run(
    config: &PraderaConfig,
    stores: &Stores,
    flow: FlowId,
    path: &Path,
) -> Result<()> {
    let document = read_document(path)?;
    let snapshot = load_snapshot(stores.blocks.as_ref(), stores.flows.as_ref(), flow).await?;
    let batch = reconcile(
        &snapshot,
        &document,
        &config.user,
        config.session.reconcile_options(),
    )?;
    tracing::info!("{}", batch.summary());
    print_json(&batch)
}

/// Save through a session so created ids come back in the printed document.
async fn cmd_reconcile(
    config: &PraderaConfig,
    stores: Stores,
    flow: FlowId,
    path: &Path,
) -> Result<()> {
    let document = read_document(path)?;
    let handle = spawn_session(&config.session, stores, config.user.clone(), flow);
    let mut events = handle.subscribe();

    handle.change(document).await?;
    handle.save().await?;
    let saved = handle.document().await?;
    handle.close().await?;

    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Conflicts(conflicts) => {
                for c in conflicts {
                    tracing::warn!(
                        "block {} at position {} changed in the store, edit skipped",
                        c.block_id,
                        c.position
                    );
                }
            }
            SessionEvent::Reconciled {
                applied, created, ..
            } => tracing::info!("applied {} mutations, created {} blocks", applied, created),
            _ => {}
        }
    }
    print_json(&saved)
}

async fn cmd_upload(stores: &Stores, flow: FlowId, path: &Path) -> Result<()> {
    let document = read_document(path)?;
    stores
        .flows
        .upload_document_state(flow, &document.to_value()?)
        .await?;
    tracing::info!("uploaded document state for flow {}", flow);
    Ok(())
}

async fn cmd_flows(stores: &Stores, user: UserId) -> Result<()> {
    for flow in stores.flows.flows_by_user(user).await? {
        println!("{}\t{}", flow.id, flow.name);
    }
    Ok(())
}

async fn cmd_search(stores: &Stores, query: &str) -> Result<()> {
    let hits = stores.blocks.search_blocks(query).await?;
    for block in &hits {
        let id = block.id.map(|id| id.to_string()).unwrap_or_default();
        println!("{}\t{}\t{}", id, block.block_type, block.content);
    }
    tracing::info!("{} blocks match '{}'", hits.len(), query);
    Ok(())
}
