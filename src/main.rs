use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chanfeed::config::Config;
use chanfeed::daemon::{Connector, Daemon, StubConnector};
use chanfeed::store::Store;
use chanfeed::supervisor::Supervisor;
use chanfeed::sync::StageContext;
use chanfeed::{dedup, sync, workers};

#[derive(Parser)]
#[command(name = "chanfeed", version, about = "Channel mirror: sync, dedup, serve")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the upstream session daemon (JSON-line RPC over TCP).
    Daemon {
        /// Serve sessions from a stub fixture instead of real upstream
        /// connections.
        #[arg(long, env = "STUB_FIXTURE")]
        stub: Option<PathBuf>,
    },
    /// Discover broadcast channels and merge them into the store.
    SyncChannels,
    /// Forward-sync new messages for active channels.
    SyncMessages,
    /// Backfill history for channels with download_all enabled.
    SyncHistory,
    /// Acknowledge locally-read messages back to the upstream.
    ReadSync,
    /// Run the dedup passes (media hash, then AI text hash).
    Hashes,
    /// Generate video grid thumbnails.
    Thumbnails,
    /// Archive telegraph pages referenced in messages.
    Telegraph,
    /// Update the full-text search index.
    SearchIndex {
        #[arg(long)]
        optimize: bool,
        #[arg(long)]
        rebuild: bool,
    },
    /// Retention cleanup for channels without full history.
    Cleanup,
    /// Serve the reader HTTP API.
    Serve,
    /// Run the daemon and all chains under the supervisor.
    Supervise,
    /// Manage upstream credentials.
    Cred {
        #[command(subcommand)]
        action: CredAction,
    },
}

#[derive(Subcommand)]
enum CredAction {
    Add {
        api_id: i64,
        api_hash: String,
        phone_number: String,
        #[arg(long)]
        primary: bool,
    },
    List,
    SetPrimary {
        id: i64,
    },
    Remove {
        id: i64,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Daemon { stub } => run_daemon(config, stub).await,
        Command::SyncChannels => {
            let ctx = StageContext::connect(config).await?;
            sync::channels::run(&ctx).await
        }
        Command::SyncMessages => {
            let ctx = StageContext::connect(config).await?;
            sync::messages::run(&ctx).await
        }
        Command::SyncHistory => {
            let ctx = StageContext::connect(config).await?;
            sync::history::run(&ctx).await
        }
        Command::ReadSync => {
            let ctx = StageContext::connect(config).await?;
            sync::read_sync::run(&ctx).await
        }
        Command::Hashes => {
            let store = Store::open(&config.db_path())?;
            dedup::run(&store, &config).await
        }
        Command::Thumbnails => {
            let store = Store::open(&config.db_path())?;
            workers::thumbnails::run(&store, &config.media_dir()).await
        }
        Command::Telegraph => {
            let store = Store::open(&config.db_path())?;
            workers::telegraph::run(&store, &config.telegraph_dir()).await
        }
        Command::SearchIndex { optimize, rebuild } => {
            let store = Store::open(&config.db_path())?;
            workers::search_index::run(&store, optimize, rebuild)
        }
        Command::Cleanup => {
            let store = Store::open(&config.db_path())?;
            workers::cleanup::run_cleanup(&store, &config.media_dir());
            Ok(())
        }
        Command::Serve => {
            let store = Store::open(&config.db_path())?;
            let _ = chanfeed::rocket_with_store(config, store).launch().await?;
            Ok(())
        }
        Command::Supervise => {
            let supervisor = Arc::new(Supervisor::new(config.logs_dir())?);
            supervisor.run().await
        }
        Command::Cred { action } => run_cred(config, action),
    }
}

async fn run_daemon(config: Config, stub: Option<PathBuf>) -> anyhow::Result<()> {
    info!("starting session daemon...");
    let store = Store::open(&config.db_path())?;

    let connector: Box<dyn Connector> = match stub {
        Some(fixture_path) => Box::new(StubConnector { fixture_path }),
        None => bail!(
            "no upstream connector is configured for this build; \
             run with --stub <fixture.json> or register a protocol connector \
             in daemon::connect_sessions"
        ),
    };

    let daemon = Arc::new(
        Daemon::connect_sessions(&store, &config.sessions_dir(), connector.as_ref()).await?,
    );
    let listener = TcpListener::bind(config.daemon_addr()).await?;

    let serve = Arc::clone(&daemon).serve(listener);
    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }
    daemon.shutdown().await;
    Ok(())
}

fn run_cred(config: Config, action: CredAction) -> anyhow::Result<()> {
    let store = Store::open(&config.db_path())?;
    match action {
        CredAction::Add {
            api_id,
            api_hash,
            phone_number,
            primary,
        } => {
            let id = store.add_cred(api_id, &api_hash, &phone_number, primary)?;
            println!("added credential {id}");
        }
        CredAction::List => {
            for cred in store.all_creds()? {
                println!(
                    "{}  api_id={}  phone={}  {}",
                    cred.id,
                    cred.api_id,
                    cred.redacted_phone(),
                    if cred.primary { "PRIMARY" } else { "" }
                );
            }
        }
        CredAction::SetPrimary { id } => {
            store.set_primary_cred(id)?;
            println!("credential {id} is now primary");
        }
        CredAction::Remove { id } => {
            store.delete_cred(id)?;
            println!("removed credential {id}");
        }
    }
    Ok(())
}
