mod vault;
mod watcher;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tag_flow_core::{run_worker, ReconcileScope, TagFlow, TagFlowConfig};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use vault::FsVault;

#[derive(Parser)]
#[command(name = "tag-flow", version, about = "Live tag lists for a folder of markdown notes")]
struct Cli {
    /// Root directory of the notes.
    #[arg(long, env = "TAG_FLOW_VAULT", default_value = ".")]
    vault: PathBuf,

    /// TOML config file. Defaults to tag-flow.toml in the vault.
    #[arg(long, env = "TAG_FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Note treated as open in the editor, e.g. "Recipes/index.md".
    #[arg(long, env = "TAG_FLOW_ACTIVE")]
    active: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the tag index, bring every list up to date and exit.
    Sync,
    /// Print every tag found in the vault.
    Tags,
    /// Print tag lists, optionally only those inside one note.
    Lists {
        #[arg(long)]
        note: Option<String>,
    },
    /// Insert a new tag list into a note and fill it.
    Create {
        tag: String,
        /// Owning note; defaults to --active.
        #[arg(long)]
        note: Option<String>,
        /// Byte offset to insert at; defaults to the end of the note.
        #[arg(long)]
        offset: Option<usize>,
    },
    /// Remove a tag list and its region.
    Delete { id: i64 },
    /// Keep lists up to date as notes change, until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let root = cli
        .vault
        .canonicalize()
        .with_context(|| format!("Vault {} is not accessible", cli.vault.display()))?;
    let config_path = cli.config.unwrap_or_else(|| root.join("tag-flow.toml"));
    let mut config = TagFlowConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let active = match &cli.command {
        Command::Create { note: Some(note), .. } => Some(note.clone()),
        _ => cli.active.clone(),
    };
    if active.is_none() && config.interactive_scope == ReconcileScope::ActiveNoteOnly {
        // Without an editor there is no open buffer to race with.
        tracing::info!("No active note, reconciling all lists on every trigger");
        config.interactive_scope = ReconcileScope::AllLists;
    }

    let vault = Arc::new(FsVault::new(root));
    vault.set_active(active);

    let mut flow = TagFlow::new(vault.clone(), config);
    flow.initialize().await.context("Failed to start tag flow")?;

    match cli.command {
        Command::Sync => {
            let report = flow.reconcile_all(ReconcileScope::AllLists).await?;
            println!(
                "{} rewritten, {} unchanged, {} retired, {} skipped, {} missing markers",
                report.rewritten,
                report.unchanged,
                report.retired.len(),
                report.skipped,
                report.missing_markers
            );
        }
        Command::Tags => {
            for tag in flow.all_tags() {
                println!("{}", tag);
            }
        }
        Command::Lists { note } => {
            let lists = match note.or_else(|| cli.active.clone()) {
                Some(note) => flow.lists_in_note(&note),
                None => flow.registry().all().to_vec(),
            };
            for list in lists {
                println!("{}\t{}\t{}", list.id, list.tag, list.owner_note);
            }
        }
        Command::Create { tag, offset, .. } => {
            let list = flow
                .on_tag_selected(&tag, offset)
                .await
                .with_context(|| format!("Failed to create a list for {}", tag))?;
            println!("{}\t{}\t{}", list.id, list.tag, list.owner_note);
        }
        Command::Delete { id } => {
            flow.on_list_delete_requested(id)
                .await
                .with_context(|| format!("Failed to delete list {}", id))?;
        }
        Command::Watch => watch(&mut flow, vault.clone()).await?,
    }

    flow.shutdown().await?;
    Ok(())
}

async fn watch(flow: &mut TagFlow<FsVault>, vault: Arc<FsVault>) -> Result<()> {
    flow.reconcile_all(ReconcileScope::AllLists).await?;

    let (tx, rx) = mpsc::channel(1000);
    // Dropping the handle stops the watcher.
    let _watcher = watcher::spawn_watcher(vault.root(), tx)
        .with_context(|| format!("Failed to watch {}", vault.root().display()))?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => {
                tracing::error!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    run_worker(flow, rx, shutdown).await;
    Ok(())
}
