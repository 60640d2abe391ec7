//! The in-memory entry store: ordered newest-first, indexed by
//! fingerprint and id, capacity-bound with pin-aware eviction.
//!
//! Concurrency model: one `parking_lot::Mutex` guards the whole store.
//! Every operation is a short in-memory computation over at most a few
//! thousand entries, so finer-grained locking buys nothing here. No
//! operation does I/O while holding the lock; persistence mirroring
//! happens in the IPC layer after the lock is released.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::fuzzy::fuzzy_match;
use crate::models::{self, Entry};

/// Result of [`Store::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new entry was created with this id.
    Added(u64),
    /// Identical content was already present; the existing entry was
    /// bumped to the front with a fresh timestamp.
    Deduplicated,
    /// Zero-length content; nothing was stored.
    Rejected,
}

pub struct Store {
    inner: Mutex<Inner>,
    max_entries: usize,
}

struct Inner {
    /// Newest first. Dedup bump moves an entry to index 0 without
    /// disturbing the relative order of the rest.
    entries: Vec<Entry>,
    by_fingerprint: HashMap<String, usize>,
    by_id: HashMap<u64, usize>,
    next_id: u64,
}

impl Inner {
    /// Positions shift on every insert/remove, so the maps are rebuilt
    /// wholesale after structural changes. O(n) with small n.
    fn rebuild_indices(&mut self) {
        self.by_fingerprint.clear();
        self.by_id.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.by_fingerprint.insert(entry.fingerprint.clone(), idx);
            self.by_id.insert(entry.id, idx);
        }
    }
}

impl Store {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                by_fingerprint: HashMap::new(),
                by_id: HashMap::new(),
                next_id: 1,
            }),
            max_entries,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Insert new content, or bump the existing entry when the
    /// fingerprint is already live.
    pub fn add(&self, content: Bytes, media_type: &str) -> AddOutcome {
        if content.is_empty() {
            return AddOutcome::Rejected;
        }
        let fingerprint = models::fingerprint(&content);

        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.by_fingerprint.get(&fingerprint) {
            let mut existing = inner.entries.remove(idx);
            existing.timestamp = models::now_micros();
            inner.entries.insert(0, existing);
            inner.rebuild_indices();
            return AddOutcome::Deduplicated;
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(0, Entry::new(id, content, media_type, fingerprint));

        self.evict(&mut inner);
        inner.rebuild_indices();

        AddOutcome::Added(id)
    }

    /// Remove oldest non-pinned entries until back within capacity.
    /// When everything left is pinned the store is allowed to overshoot
    /// rather than destroy pinned data; it self-corrects on later adds.
    fn evict(&self, inner: &mut Inner) {
        while inner.entries.len() > self.max_entries {
            match inner.entries.iter().rposition(|e| !e.pinned) {
                Some(idx) => {
                    inner.entries.remove(idx);
                }
                None => break,
            }
        }
    }

    /// Startup restore: append a persisted entry verbatim. Persisted
    /// data is trusted, so no dedup check and no eviction — a shrunk
    /// capacity must not silently drop restored history.
    pub fn load(&self, entry: Entry) {
        let mut inner = self.inner.lock();
        if inner.by_fingerprint.contains_key(&entry.fingerprint) {
            tracing::warn!(
                id = entry.id,
                "duplicate fingerprint in persisted history; last loaded row wins"
            );
        }
        if entry.id >= inner.next_id {
            inner.next_id = entry.id + 1;
        }
        inner.entries.push(entry);
        inner.rebuild_indices();
    }

    pub fn get(&self, id: u64) -> Option<Entry> {
        let inner = self.inner.lock();
        inner.by_id.get(&id).map(|&idx| inner.entries[idx].clone())
    }

    /// Up to `limit` entries starting at `offset`, in recency order.
    /// Out-of-range offsets yield an empty result.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<Entry> {
        let inner = self.inner.lock();
        inner.entries.iter().skip(offset).take(limit).cloned().collect()
    }

    /// Fuzzy-rank all previews against `query`, best first. The sort is
    /// stable, so equal scores keep their recency order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Entry> {
        let inner = self.inner.lock();
        let mut matches: Vec<(i64, &Entry)> = inner
            .entries
            .iter()
            .filter_map(|e| fuzzy_match(query, &e.preview).map(|score| (score, e)))
            .collect();
        matches.sort_by_key(|&(score, _)| std::cmp::Reverse(score));
        matches
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Idempotent: deleting an absent id returns false.
    pub fn delete(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.get(&id).copied() {
            Some(idx) => {
                inner.entries.remove(idx);
                inner.rebuild_indices();
                true
            }
            None => false,
        }
    }

    /// Removes everything, pinned entries included.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.by_fingerprint.clear();
        inner.by_id.clear();
    }

    /// Toggle only the pinned flag; timestamp and position are untouched.
    pub fn pin(&self, id: u64, pinned: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.get(&id).copied() {
            Some(idx) => {
                inner.entries[idx].pinned = pinned;
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
