//! Short-term and long-term agent memory.
//!
//! Short-term entries live in a capped list. Entries at or above the
//! importance threshold are promoted into the long-term store when
//! `save_long_term()` runs, and the long-term store is written to a
//! markdown file (`MEMORY.md` by default):
//!
//! ```text
//! # Long-term Memory
//!
//! ## preferences
//!
//! - **editor** [8]: helix
//!   second line of a multi-line value
//! ```
//!
//! Lines the parser does not recognize survive under `## Notes`.
//!
//! The long-term store is capped; when over capacity the least important
//! entry is dropped, oldest first among equals.

use clawloop_core::error::MemoryError;
use clawloop_core::message::Role;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const HEADER: &str = "# Long-term Memory";
const NOTES: &str = "Notes";
const DEFAULT_CATEGORY: &str = "general";
const MAX_IMPORTANCE: u8 = 10;
pub const DEFAULT_MAX_LONG_TERM: usize = 200;
/// Longest value recorded from a conversation message, in characters.
const MAX_RECORDED_CHARS: usize = 500;
const KEYWORDS: &[&str] = &[
    "important",
    "remember",
    "todo",
    "task",
    "remind",
    "note",
    "save",
    "key",
    "critical",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub category: String,
    pub importance: u8,
}

impl MemoryEntry {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        category: impl Into<String>,
        importance: u8,
    ) -> Self {
        let mut category: String = category.into();
        if category.trim().is_empty() {
            category = DEFAULT_CATEGORY.into();
        } else if category == NOTES {
            // "## Notes" is reserved for unparsed lines
            category = NOTES.to_lowercase();
        }
        Self {
            key: key.into(),
            value: value.into(),
            category,
            importance: importance.clamp(1, MAX_IMPORTANCE),
        }
    }
}

/// Importance of a conversation message as a memory (1-10).
pub fn message_importance(role: Role, content: &str) -> u8 {
    let mut score: u8 = match role {
        Role::Assistant => 7,
        _ => 5,
    };
    if content.chars().count() > 200 {
        score += 1;
    }
    let lower = content.to_lowercase();
    if KEYWORDS.iter().any(|k| lower.contains(k)) {
        score += 2;
    }
    score.min(MAX_IMPORTANCE)
}

#[derive(Debug, Default)]
struct State {
    short_term: Vec<(u64, MemoryEntry)>,
    next_seq: u64,
    long_term: BTreeMap<String, MemoryEntry>,
    /// Sequence number at promotion time; loaded entries count as oldest.
    promoted_at: HashMap<String, u64>,
    notes: Vec<String>,
}

impl State {
    fn enforce_long_term_cap(&mut self, max: usize) -> usize {
        let mut dropped = 0;
        while self.long_term.len() > max {
            let victim = self
                .long_term
                .values()
                .min_by_key(|e| (e.importance, self.promoted_at.get(&e.key).copied().unwrap_or(0)))
                .map(|e| e.key.clone());
            let Some(key) = victim else { break };
            self.long_term.remove(&key);
            self.promoted_at.remove(&key);
            dropped += 1;
        }
        dropped
    }
}

/// Memory shared by every conversation of one agent.
#[derive(Debug)]
pub struct MemoryManager {
    path: PathBuf,
    max_short_term: usize,
    max_long_term: usize,
    threshold: u8,
    state: Mutex<State>,
    recorded: AtomicU64,
    save_lock: tokio::sync::Mutex<()>,
}

impl MemoryManager {
    /// A manager with an empty long-term store.
    pub fn new(path: impl Into<PathBuf>, max_short_term: usize, threshold: u8) -> Self {
        Self {
            path: path.into(),
            max_short_term: max_short_term.max(1),
            max_long_term: DEFAULT_MAX_LONG_TERM,
            threshold,
            state: Mutex::new(State::default()),
            recorded: AtomicU64::new(0),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the memory file at `path`, parsing it if it exists.
    pub fn load(
        path: impl Into<PathBuf>,
        max_short_term: usize,
        threshold: u8,
    ) -> Result<Self, MemoryError> {
        let manager = Self::new(path, max_short_term, threshold);
        match std::fs::read_to_string(&manager.path) {
            Ok(text) => {
                let (long_term, notes) = parse_markdown(&text);
                info!(
                    path = %manager.path.display(),
                    entries = long_term.len(),
                    "Loaded long-term memory"
                );
                let mut state = manager.lock();
                state.long_term = long_term;
                state.notes = notes;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %manager.path.display(), "No memory file yet");
            }
            Err(e) => return Err(MemoryError::Io(e)),
        }
        Ok(manager)
    }

    /// Cap the long-term store at `max` entries.
    pub fn with_max_long_term(mut self, max: usize) -> Self {
        self.max_long_term = max.max(1);
        let dropped = self.lock().enforce_long_term_cap(self.max_long_term);
        if dropped > 0 {
            info!(dropped, max = self.max_long_term, "Trimmed long-term memory");
        }
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a short-term entry, evicting the least important (then oldest)
    /// entry when over capacity.
    pub fn remember(&self, entry: MemoryEntry) {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(key = %entry.key, importance = entry.importance, "Remembered");
        state.short_term.push((seq, entry));

        while state.short_term.len() > self.max_short_term {
            let victim = state
                .short_term
                .iter()
                .enumerate()
                .min_by_key(|(_, (seq, e))| (e.importance, *seq))
                .map(|(i, _)| i);
            match victim {
                Some(i) => {
                    state.short_term.remove(i);
                }
                None => break,
            }
        }
    }

    /// Record a conversation message as a `conversation` memory.
    pub fn record_message(&self, role: Role, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let value: String = content.chars().take(MAX_RECORDED_CHARS).collect();
        let key = format!(
            "{}-{}-{}",
            role.as_str(),
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            self.recorded.fetch_add(1, Ordering::Relaxed)
        );
        let importance = message_importance(role, content);
        self.remember(MemoryEntry::new(key, value, "conversation", importance));
    }

    /// Newest short-term value for `key`, else the long-term one.
    pub fn recall(&self, key: &str) -> Option<String> {
        let state = self.lock();
        state
            .short_term
            .iter()
            .rev()
            .find(|(_, e)| e.key == key)
            .map(|(_, e)| e.value.clone())
            .or_else(|| state.long_term.get(key).map(|e| e.value.clone()))
    }

    /// Entries in `category` from both stores, most important first.
    pub fn recall_by_category(&self, category: &str, limit: usize) -> Vec<MemoryEntry> {
        let state = self.lock();
        let mut found: Vec<(u8, u64, MemoryEntry)> = state
            .short_term
            .iter()
            .filter(|(_, e)| e.category == category)
            .map(|(seq, e)| (e.importance, seq + 1, e.clone()))
            .collect();
        for e in state.long_term.values() {
            if e.category == category && !found.iter().any(|(_, _, f)| f.key == e.key) {
                found.push((e.importance, 0, e.clone()));
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        found.into_iter().take(limit).map(|(_, _, e)| e).collect()
    }

    /// Remove `key` from both stores. Returns whether anything was removed.
    pub fn forget(&self, key: &str) -> bool {
        let mut state = self.lock();
        let before = state.short_term.len();
        state.short_term.retain(|(_, e)| e.key != key);
        let removed_short = state.short_term.len() != before;
        let removed_long = state.long_term.remove(key).is_some();
        state.promoted_at.remove(key);
        removed_short || removed_long
    }

    pub fn short_term_len(&self) -> usize {
        self.lock().short_term.len()
    }

    pub fn long_term_len(&self) -> usize {
        self.lock().long_term.len()
    }

    /// Up to `limit` memories rendered for the system prompt, most
    /// important first. Empty when there is nothing to show.
    pub fn context(&self, limit: usize) -> String {
        let state = self.lock();
        let mut all: Vec<(&MemoryEntry, u64)> = state
            .short_term
            .iter()
            .map(|(seq, e)| (e, seq + 1))
            .chain(state.long_term.values().map(|e| (e, 0)))
            .collect();
        all.sort_by(|a, b| b.0.importance.cmp(&a.0.importance).then(b.1.cmp(&a.1)));

        all.into_iter()
            .take(limit)
            .map(|(e, _)| {
                let mut value: String = e.value.chars().take(100).collect();
                if value.len() < e.value.len() {
                    value.push_str("...");
                }
                format!("- [{}] {}: {}", e.category, e.key, value.replace('\n', " "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Promote important short-term entries and write the long-term store.
    ///
    /// Returns `Ok(false)` when the rendered file is byte-identical to what
    /// is already on disk, in which case nothing is written.
    pub async fn save_long_term(&self) -> Result<bool, MemoryError> {
        let _guard = self.save_lock.lock().await;

        let rendered = {
            let mut state = self.lock();
            let promoted: Vec<(u64, MemoryEntry)> = state
                .short_term
                .iter()
                .filter(|(_, e)| e.importance >= self.threshold)
                .map(|(seq, e)| (seq + 1, e.clone()))
                .collect();
            for (seq, entry) in promoted {
                state.promoted_at.insert(entry.key.clone(), seq);
                state.long_term.insert(entry.key.clone(), entry);
            }
            let dropped = state.enforce_long_term_cap(self.max_long_term);
            if dropped > 0 {
                debug!(dropped, max = self.max_long_term, "Long-term memory over capacity");
            }
            render_markdown(&state.long_term, &state.notes)
        };

        match tokio::fs::read(&self.path).await {
            Ok(existing) if existing == rendered.as_bytes() => {
                debug!(path = %self.path.display(), "Long-term memory unchanged");
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(MemoryError::Io(e)),
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, rendered.as_bytes()).await?;
        info!(
            path = %self.path.display(),
            entries = self.long_term_len(),
            "Saved long-term memory"
        );
        Ok(true)
    }
}

fn render_markdown(long_term: &BTreeMap<String, MemoryEntry>, notes: &[String]) -> String {
    let mut by_category: BTreeMap<&str, Vec<&MemoryEntry>> = BTreeMap::new();
    for entry in long_term.values() {
        by_category.entry(&entry.category).or_default().push(entry);
    }

    let mut out = String::from(HEADER);
    out.push('\n');
    for (category, mut entries) in by_category {
        entries.sort_by(|a, b| b.importance.cmp(&a.importance).then(a.key.cmp(&b.key)));
        out.push_str(&format!("\n## {category}\n\n"));
        for e in entries {
            let mut lines = e.value.split('\n');
            let first = lines.next().unwrap_or_default();
            out.push_str(&format!("- **{}** [{}]: {}\n", e.key, e.importance, first));
            for line in lines {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    if !notes.is_empty() {
        out.push_str(&format!("\n## {NOTES}\n\n"));
        for line in notes {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// `- **key** [7]: value`
fn parse_entry_line(line: &str) -> Option<(String, u8, String)> {
    let rest = line.strip_prefix("- **")?;
    let key_end = rest.find("** [")?;
    let key = &rest[..key_end];
    let rest = &rest[key_end + 4..];
    let close = rest.find("]:")?;
    let importance: u8 = rest[..close].trim().parse().ok()?;
    let value = rest[close + 2..].strip_prefix(' ').unwrap_or(&rest[close + 2..]);
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), importance, value.to_string()))
}

fn parse_markdown(text: &str) -> (BTreeMap<String, MemoryEntry>, Vec<String>) {
    let mut entries: BTreeMap<String, MemoryEntry> = BTreeMap::new();
    let mut notes = Vec::new();
    let mut category: Option<String> = None;
    let mut in_notes = false;
    let mut last_key: Option<String> = None;

    for line in text.lines() {
        if in_notes {
            if !line.trim().is_empty() {
                notes.push(line.to_string());
            }
            continue;
        }
        if let (Some(cont), Some(key)) = (line.strip_prefix("  "), last_key.as_ref()) {
            if let Some(entry) = entries.get_mut(key) {
                entry.value.push('\n');
                entry.value.push_str(cont);
                continue;
            }
        }
        last_key = None;

        if line.trim().is_empty() || line == HEADER {
            continue;
        }
        if let Some(heading) = line.strip_prefix("## ") {
            let heading = heading.trim();
            if heading == NOTES {
                in_notes = true;
            } else {
                category = Some(heading.to_string());
            }
            continue;
        }
        match (&category, parse_entry_line(line)) {
            (Some(cat), Some((key, importance, value))) => {
                entries.insert(
                    key.clone(),
                    MemoryEntry::new(key.clone(), value, cat.clone(), importance),
                );
                last_key = Some(key);
            }
            _ => notes.push(line.to_string()),
        }
    }
    (entries, notes)
}
