//! Clipboard entry model and the helpers that derive its fields.
//!
//! An `Entry` owns its payload as a refcounted immutable buffer so the
//! store, the wire serializer, and the persistence mirror can share it
//! without copying.

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::PREVIEW_LEN;

/// One clipboard history record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Monotonically increasing, never reused. 0 is never a valid id.
    pub id: u64,
    pub content: Bytes,
    pub media_type: String,
    /// Bounded single-line display string, computed once at creation.
    pub preview: String,
    /// SHA-256 of `content`, lowercase hex. Dedup key.
    pub fingerprint: String,
    /// Microseconds since the Unix epoch; refreshed on dedup bump.
    pub timestamp: i64,
    pub pinned: bool,
    pub size: usize,
}

impl Entry {
    /// Build a fresh entry. The fingerprint is passed in because the
    /// store computes it first for the dedup lookup.
    pub fn new(id: u64, content: Bytes, media_type: &str, fingerprint: String) -> Self {
        let preview = make_preview(&content, media_type);
        let size = content.len();
        Self {
            id,
            content,
            media_type: media_type.to_string(),
            preview,
            fingerprint,
            timestamp: now_micros(),
            pinned: false,
            size,
        }
    }
}

/// Deterministic content hash used as the dedup key.
pub fn fingerprint(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Derive a bounded single-line preview from raw content.
///
/// Non-text payloads get a bracketed `[media_type size]` summary. Text is
/// decoded as UTF-8 up to the first invalid sequence, newlines and tabs
/// become spaces, and output stops after `PREVIEW_LEN` characters with a
/// trailing ellipsis whenever input was left over.
pub fn make_preview(content: &[u8], media_type: &str) -> String {
    if media_type.is_empty() {
        return "[unknown]".to_string();
    }
    if !media_type.starts_with("text/") {
        return format!("[{} {}]", media_type, human_size(content.len()));
    }

    let valid = match std::str::from_utf8(content) {
        Ok(text) => text,
        Err(err) => {
            std::str::from_utf8(&content[..err.valid_up_to()]).unwrap_or_default()
        }
    };

    let mut preview = String::with_capacity(PREVIEW_LEN + 4);
    let mut chars = 0usize;
    let mut consumed = 0usize;
    for ch in valid.chars() {
        if chars == PREVIEW_LEN {
            break;
        }
        preview.push(match ch {
            '\n' | '\r' | '\t' => ' ',
            c => c,
        });
        consumed += ch.len_utf8();
        chars += 1;
    }

    let trimmed_len = preview.trim_end().len();
    preview.truncate(trimmed_len);

    if consumed < content.len() {
        preview.push('…');
    }
    preview
}

fn human_size(len: usize) -> String {
    if len < 1024 {
        format!("{}B", len)
    } else if len < 1024 * 1024 {
        format!("{}KB", len / 1024)
    } else {
        format!("{:.1}MB", len as f64 / (1024.0 * 1024.0))
    }
}

/// Compact "how long ago" rendering for list output.
pub fn time_ago(timestamp: i64) -> String {
    time_ago_at(timestamp, now_micros())
}

fn time_ago_at(timestamp: i64, now: i64) -> String {
    let diff = (now - timestamp) / 1_000_000;
    if diff < 5 {
        // Includes clock skew (negative diff).
        "now".to_string()
    } else if diff < 60 {
        format!("{}s", diff)
    } else if diff < 3600 {
        format!("{}m", diff / 60)
    } else if diff < 86400 {
        format!("{}h", diff / 3600)
    } else {
        format!("{}d", diff / 86400)
    }
}
