//! Command protocol over a local Unix socket.
//!
//! Wire format, both directions: a 4-byte big-endian length prefix
//! followed by that many bytes of UTF-8 JSON. One request/response
//! exchange per connection; the server closes after responding. Frames
//! declaring more than [`IPC_MAX_MSG`] bytes are refused without
//! reading the body.
//!
//! Each command maps to exactly one store operation. Malformed requests
//! come back as `{"ok":false,"error":...}`; a truncated or broken
//! connection is dropped without touching the store.

use std::io;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::config::{IPC_MAX_MSG, VERSION};
use crate::database::Database;
use crate::models::{self, Entry};
use crate::store::{AddOutcome, Store};

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("oversized frame ({0} bytes)")]
    Oversized(u32),
}

/// Callback invoked on the `show` command. Rendering lives outside the
/// daemon; this is the whole contract.
pub type ShowHandler = Box<dyn Fn() + Send + Sync>;

pub struct IpcServer {
    store: Arc<Store>,
    db: Option<Arc<Database>>,
    show: Option<ShowHandler>,
}

impl IpcServer {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            db: None,
            show: None,
        }
    }

    /// Attach a persistence mirror. Mutating commands will issue
    /// best-effort database calls after the store mutation.
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_show_handler(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.show = Some(Box::new(handler));
        self
    }

    /// Accept loop: one task per connection.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) {
        loop {
            let stream = match listener.accept().await {
                Ok((stream, _addr)) => stream,
                Err(err) => {
                    tracing::warn!(%err, "failed to accept IPC connection");
                    continue;
                }
            };
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    // Partial frames and broken pipes are fatal only to
                    // this connection.
                    tracing::debug!(%err, "IPC connection dropped");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: UnixStream) -> io::Result<()> {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        let len = u32::from_be_bytes(header);

        if len > IPC_MAX_MSG {
            let response = error_response("message too large").to_string();
            write_frame(&mut stream, response.as_bytes()).await?;
            return Ok(());
        }

        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await?;

        let response = match serde_json::from_slice::<Value>(&body) {
            Ok(request) => self.dispatch(&request),
            Err(_) => error_response("invalid json"),
        };

        write_frame(&mut stream, response.to_string().as_bytes()).await?;
        stream.shutdown().await
    }

    /// Parse one command and call exactly one store operation.
    fn dispatch(&self, request: &Value) -> Value {
        let Some(cmd) = request.get("cmd").and_then(Value::as_str) else {
            return error_response("missing cmd");
        };

        match cmd {
            "ingest" => self.cmd_ingest(request),
            "list" => self.cmd_list(request),
            "search" => self.cmd_search(request),
            "delete" => self.cmd_delete(request),
            "clear" => self.cmd_clear(),
            "pin" => self.cmd_pin(request),
            "show" => self.cmd_show(),
            "status" => self.cmd_status(),
            _ => error_response("unknown command"),
        }
    }

    fn cmd_ingest(&self, request: &Value) -> Value {
        let content_b64 = request.get("content").and_then(Value::as_str);
        let mime = request.get("mime").and_then(Value::as_str);
        let (Some(content_b64), Some(mime)) = (content_b64, mime) else {
            return error_response("missing content or mime");
        };

        let decoded = match BASE64.decode(content_b64) {
            Ok(bytes) => bytes,
            Err(_) => return error_response("invalid base64"),
        };
        if decoded.is_empty() {
            return error_response("empty content");
        }

        match self.store.add(Bytes::from(decoded), mime) {
            AddOutcome::Added(id) => {
                if let Some(db) = &self.db {
                    if let Some(entry) = self.store.get(id) {
                        db.save_async(entry);
                    }
                }
                json!({"ok": true, "id": id})
            }
            AddOutcome::Deduplicated => json!({"ok": true, "id": 0}),
            AddOutcome::Rejected => error_response("empty content"),
        }
    }

    fn cmd_list(&self, request: &Value) -> Value {
        let limit = get_u64(request, "limit").unwrap_or(50) as usize;
        let offset = get_u64(request, "offset").unwrap_or(0) as usize;
        entries_response(&self.store.list(limit, offset))
    }

    fn cmd_search(&self, request: &Value) -> Value {
        let Some(query) = request.get("query").and_then(Value::as_str) else {
            return error_response("missing query");
        };
        let limit = get_u64(request, "limit").unwrap_or(50) as usize;
        entries_response(&self.store.search(query, limit))
    }

    fn cmd_delete(&self, request: &Value) -> Value {
        let Some(id) = get_u64(request, "id") else {
            return error_response("missing id");
        };

        let found = self.store.delete(id);
        if found {
            if let Some(db) = &self.db {
                if let Err(err) = db.delete(id) {
                    tracing::warn!(id, %err, "failed to delete entry from database");
                }
            }
        }
        json!({"ok": found})
    }

    fn cmd_clear(&self) -> Value {
        self.store.clear();
        if let Some(db) = &self.db {
            if let Err(err) = db.clear() {
                tracing::warn!(%err, "failed to clear database");
            }
        }
        json!({"ok": true})
    }

    fn cmd_pin(&self, request: &Value) -> Value {
        let Some(id) = get_u64(request, "id") else {
            return error_response("missing id");
        };
        let pinned = request
            .get("pinned")
            .and_then(|v| v.as_bool().or_else(|| v.as_i64().map(|n| n != 0)))
            .unwrap_or(true);

        let found = self.store.pin(id, pinned);
        if found {
            if let Some(db) = &self.db {
                if let Err(err) = db.update_pin(id, pinned) {
                    tracing::warn!(id, %err, "failed to update pin in database");
                }
            }
        }
        json!({"ok": found})
    }

    fn cmd_show(&self) -> Value {
        if let Some(show) = &self.show {
            show();
        }
        json!({"ok": true})
    }

    fn cmd_status(&self) -> Value {
        json!({
            "ok": true,
            "entries": self.store.count(),
            "max_entries": self.store.capacity(),
            "version": VERSION,
        })
    }
}

fn get_u64(request: &Value, key: &str) -> Option<u64> {
    request.get(key).and_then(Value::as_u64)
}

fn error_response(message: &str) -> Value {
    json!({"ok": false, "error": message})
}

fn entries_response(entries: &[Entry]) -> Value {
    let wire: Vec<WireEntry> = entries.iter().map(WireEntry::from).collect();
    json!({"ok": true, "count": wire.len(), "entries": wire})
}

/// Entry as it appears on the wire. Field names are part of the
/// protocol; content is base64.
#[derive(Serialize)]
struct WireEntry {
    id: u64,
    preview: String,
    mime: String,
    hash: String,
    timestamp: i64,
    pinned: bool,
    size: usize,
    time_ago: String,
    content: String,
}

impl From<&Entry> for WireEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.id,
            preview: entry.preview.clone(),
            mime: entry.media_type.clone(),
            hash: entry.fingerprint.clone(),
            timestamp: entry.timestamp,
            pinned: entry.pinned,
            size: entry.size,
            time_ago: models::time_ago(entry.timestamp),
            content: BASE64.encode(&entry.content),
        }
    }
}

fn frame_len(body_len: usize) -> io::Result<u32> {
    u32::try_from(body_len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame length exceeds u32"))
}

async fn write_frame(stream: &mut UnixStream, body: &[u8]) -> io::Result<()> {
    let len = frame_len(body.len())?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Bind the listener, clearing a stale socket file first.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

/// One request/response exchange against a running daemon. Shared by
/// the CLI client and the integration tests.
pub async fn send_command(path: &Path, request: &Value) -> Result<Value, IpcError> {
    let mut stream = UnixStream::connect(path).await?;

    let body = serde_json::to_vec(request)?;
    write_frame(&mut stream, &body).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header);
    if len > IPC_MAX_MSG {
        return Err(IpcError::Oversized(len));
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_with_entries(contents: &[&str]) -> IpcServer {
        let store = Arc::new(Store::new(100));
        for content in contents {
            store.add(Bytes::copy_from_slice(content.as_bytes()), "text/plain");
        }
        IpcServer::new(store)
    }

    #[test]
    fn dispatch_requires_cmd() {
        let server = server_with_entries(&[]);
        let resp = server.dispatch(&json!({"limit": 10}));
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"], json!("missing cmd"));
    }

    #[test]
    fn dispatch_rejects_unknown_command() {
        let server = server_with_entries(&[]);
        let resp = server.dispatch(&json!({"cmd": "frobnicate"}));
        assert_eq!(resp["error"], json!("unknown command"));
    }

    #[test]
    fn ingest_requires_content_and_mime() {
        let server = server_with_entries(&[]);
        let resp = server.dispatch(&json!({"cmd": "ingest", "mime": "text/plain"}));
        assert_eq!(resp["error"], json!("missing content or mime"));

        let resp = server.dispatch(&json!({"cmd": "ingest", "content": "aGk="}));
        assert_eq!(resp["error"], json!("missing content or mime"));
    }

    #[test]
    fn ingest_rejects_bad_base64() {
        let server = server_with_entries(&[]);
        let resp = server.dispatch(
            &json!({"cmd": "ingest", "content": "not base64!!!", "mime": "text/plain"}),
        );
        assert_eq!(resp["error"], json!("invalid base64"));
    }

    #[test]
    fn ingest_rejects_empty_content() {
        let server = server_with_entries(&[]);
        let resp =
            server.dispatch(&json!({"cmd": "ingest", "content": "", "mime": "text/plain"}));
        assert_eq!(resp["error"], json!("empty content"));
    }

    #[test]
    fn ingest_assigns_ids_and_dedups() {
        let server = server_with_entries(&[]);
        let request = json!({"cmd": "ingest", "content": BASE64.encode("hello"), "mime": "text/plain"});

        let resp = server.dispatch(&request);
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["id"], json!(1));

        // Identical content: dedup signal 0, nothing new created.
        let resp = server.dispatch(&request);
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["id"], json!(0));
    }

    #[test]
    fn list_serializes_entries() {
        let server = server_with_entries(&["hello world"]);
        let resp = server.dispatch(&json!({"cmd": "list"}));
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["count"], json!(1));

        let entry = &resp["entries"][0];
        assert_eq!(entry["preview"], json!("hello world"));
        assert_eq!(entry["mime"], json!("text/plain"));
        assert_eq!(entry["size"], json!(11));
        assert_eq!(entry["pinned"], json!(false));
        assert_eq!(entry["time_ago"], json!("now"));
        assert_eq!(
            BASE64.decode(entry["content"].as_str().unwrap()).unwrap(),
            b"hello world"
        );
        assert_eq!(entry["hash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn wire_entry_field_set_is_stable() {
        let server = server_with_entries(&["abc"]);
        let resp = server.dispatch(&json!({"cmd": "list"}));

        let entry = resp["entries"][0].as_object().unwrap();
        let mut keys: Vec<&str> = entry.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "content", "hash", "id", "mime", "pinned", "preview", "size", "time_ago",
                "timestamp"
            ]
        );
    }

    #[test]
    fn frame_len_rejects_bodies_over_u32() {
        assert_eq!(frame_len(0).unwrap(), 0);
        assert_eq!(frame_len(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(frame_len(u32::MAX as usize + 1).is_err());
    }

    #[test]
    fn list_applies_defaults_and_offset() {
        let contents: Vec<String> = (0..60).map(|i| format!("item-{}", i)).collect();
        let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
        let server = server_with_entries(&refs);

        let resp = server.dispatch(&json!({"cmd": "list"}));
        assert_eq!(resp["count"], json!(50));

        let resp = server.dispatch(&json!({"cmd": "list", "limit": 5, "offset": 58}));
        assert_eq!(resp["count"], json!(2));
    }

    #[test]
    fn search_requires_query() {
        let server = server_with_entries(&[]);
        let resp = server.dispatch(&json!({"cmd": "search"}));
        assert_eq!(resp["error"], json!("missing query"));
    }

    #[test]
    fn search_returns_ranked_matches() {
        let server = server_with_entries(&["hello world", "goodbye", "hello there"]);
        let resp = server.dispatch(&json!({"cmd": "search", "query": "hello"}));
        assert_eq!(resp["count"], json!(2));

        let resp = server.dispatch(&json!({"cmd": "search", "query": "zzz"}));
        assert_eq!(resp["count"], json!(0));
    }

    #[test]
    fn delete_reports_found() {
        let server = server_with_entries(&["target"]);
        let resp = server.dispatch(&json!({"cmd": "delete", "id": 1}));
        assert_eq!(resp["ok"], json!(true));

        let resp = server.dispatch(&json!({"cmd": "delete", "id": 1}));
        assert_eq!(resp["ok"], json!(false));

        let resp = server.dispatch(&json!({"cmd": "delete"}));
        assert_eq!(resp["error"], json!("missing id"));
    }

    #[test]
    fn pin_defaults_to_true() {
        let server = server_with_entries(&["pin me"]);
        let resp = server.dispatch(&json!({"cmd": "pin", "id": 1}));
        assert_eq!(resp["ok"], json!(true));
        assert!(server.store.get(1).unwrap().pinned);

        let resp = server.dispatch(&json!({"cmd": "pin", "id": 1, "pinned": false}));
        assert_eq!(resp["ok"], json!(true));
        assert!(!server.store.get(1).unwrap().pinned);

        let resp = server.dispatch(&json!({"cmd": "pin", "id": 999}));
        assert_eq!(resp["ok"], json!(false));
    }

    #[test]
    fn clear_empties_store() {
        let server = server_with_entries(&["aaa", "bbb"]);
        let resp = server.dispatch(&json!({"cmd": "clear"}));
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(server.store.count(), 0);
    }

    #[test]
    fn show_invokes_handler() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let server = IpcServer::new(Arc::new(Store::new(10)))
            .with_show_handler(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let resp = server.dispatch(&json!({"cmd": "show"}));
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_reports_counts_and_version() {
        let server = server_with_entries(&["one", "two"]);
        let resp = server.dispatch(&json!({"cmd": "status"}));
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["entries"], json!(2));
        assert_eq!(resp["max_entries"], json!(100));
        assert_eq!(resp["version"], json!(VERSION));
    }
}
