//! clipd binary: clipboard history daemon plus thin IPC client
//! subcommands that talk to a running daemon.

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use clipd::{config, ipc, Database, IpcServer, Store};

#[derive(Parser)]
#[command(name = "clipd", version, about = "Clipboard history daemon")]
struct Cli {
    /// With no subcommand, clipd runs as the daemon.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the daemon to show the history popup
    Show,
    /// List recent entries
    List {
        #[arg(default_value_t = 50)]
        limit: u64,
    },
    /// Fuzzy-search entry previews
    Search {
        query: String,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// Delete an entry by id
    Delete { id: u64 },
    /// Pin an entry (exempt from eviction)
    Pin { id: u64 },
    /// Unpin an entry
    Unpin { id: u64 },
    /// Remove all entries
    Clear,
    /// Show daemon status
    Status,
    /// Read stdin and submit it as a new clipboard payload
    Ingest {
        #[arg(long, default_value = "text/plain")]
        mime: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        None => run_daemon().await,
        Some(command) => run_client(command).await,
    }
}

async fn run_daemon() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(Store::new(config::MAX_ENTRIES));

    // Persistence is a best-effort mirror: a failed open degrades to a
    // memory-only daemon instead of refusing to start.
    let db = match config::db_path().map_err(anyhow::Error::from).and_then(|path| {
        Database::open(&path).with_context(|| format!("open {}", path.display()))
    }) {
        Ok(db) => Some(Arc::new(db)),
        Err(err) => {
            tracing::warn!(%err, "persistence disabled");
            None
        }
    };

    if let Some(db) = &db {
        match db.load_all() {
            Ok(entries) => {
                let count = entries.len();
                for entry in entries {
                    store.load(entry);
                }
                tracing::info!(count, "loaded entries from database");
            }
            Err(err) => tracing::warn!(%err, "failed to load persisted history"),
        }
    }

    let socket = config::socket_path();
    let listener = ipc::bind(&socket)
        .with_context(|| format!("bind IPC socket {}", socket.display()))?;
    tracing::info!(path = %socket.display(), "IPC server listening");

    let mut server = IpcServer::new(Arc::clone(&store)).with_show_handler(|| {
        // Popup rendering is an external collaborator; shells watching
        // the daemon log can react to this.
        tracing::info!("show requested");
    });
    if let Some(db) = &db {
        server = server.with_database(Arc::clone(db));
    }

    tokio::select! {
        _ = Arc::new(server).serve(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    let _ = std::fs::remove_file(&socket);
    Ok(())
}

async fn run_client(command: Command) -> anyhow::Result<()> {
    let request = match command {
        Command::Show => json!({"cmd": "show"}),
        Command::List { limit } => json!({"cmd": "list", "limit": limit}),
        Command::Search { query, limit } => {
            json!({"cmd": "search", "query": query, "limit": limit})
        }
        Command::Delete { id } => json!({"cmd": "delete", "id": id}),
        Command::Pin { id } => json!({"cmd": "pin", "id": id, "pinned": true}),
        Command::Unpin { id } => json!({"cmd": "pin", "id": id, "pinned": false}),
        Command::Clear => json!({"cmd": "clear"}),
        Command::Status => json!({"cmd": "status"}),
        Command::Ingest { mime } => match ingest_request(&mime)? {
            Some(request) => request,
            None => return Ok(()),
        },
    };

    let socket = config::socket_path();
    let response: Value = ipc::send_command(&socket, &request)
        .await
        .with_context(|| format!("daemon not running (socket: {})", socket.display()))?;

    println!("{response}");
    Ok(())
}

/// Build an ingest request from stdin. Returns None for empty input,
/// which is not an error — watchers pipe empty selections sometimes.
fn ingest_request(mime: &str) -> anyhow::Result<Option<Value>> {
    let mut content = Vec::new();
    std::io::stdin()
        .read_to_end(&mut content)
        .context("read stdin")?;

    // Clipboard bridges append a trailing newline to text payloads.
    if mime.starts_with("text/") && content.last() == Some(&b'\n') {
        content.pop();
    }
    if content.is_empty() {
        return Ok(None);
    }

    Ok(Some(json!({
        "cmd": "ingest",
        "content": BASE64.encode(&content),
        "mime": mime,
    })))
}
