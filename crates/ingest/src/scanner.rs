//! The end-to-end scan: enumerate files, decide full vs. incremental
//! read range per file, parse in parallel, price, merge, dedup, update
//! cursors. Files parse independently; a failure in one is recorded
//! against that file alone and never aborts the batch. The scan itself
//! cannot fail — it always returns the best-effort merged set.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use usage_core::{PricingTable, RawEvent, TokenCounts, Tool, UsageEntry};
use usage_store::{CursorStore, FileCursor};

use crate::parser::{self, LineParse};
use crate::sources::{SourceFile, SourceSet};
use crate::types::{ScanIssue, ScanStats};

/// Everything one scan returns: the complete accumulated entry set
/// known so far (the caller replaces its dataset wholesale) plus the
/// aggregated warnings.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub entries: Vec<UsageEntry>,
    pub stats: ScanStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    Full,
    Incremental,
}

struct FileTask {
    tool: Tool,
    path: PathBuf,
    file_path: String,
    file_size: u64,
    mtime: Option<String>,
    start_offset: u64,
    seed_model: Option<String>,
    seed_totals: Option<TokenCounts>,
}

struct ParsedFile {
    tool: Tool,
    file_path: String,
    file_size: u64,
    mtime: Option<String>,
    start_offset: u64,
    bytes_read: u64,
    events: Vec<RawEvent>,
    records_skipped: usize,
    issue: Option<String>,
    last_model: Option<String>,
    prev_totals: Option<TokenCounts>,
    /// False when nothing trustworthy was read; the cursor is then left
    /// untouched so the next scan retries the file.
    advanced: bool,
}

/// Drives scans over one cursor store. Taking `&mut self` serializes
/// scans statically: two scans can never race on the same store.
pub struct Scanner {
    sources: SourceSet,
    pricing: PricingTable,
    store: CursorStore,
    entries: BTreeMap<String, UsageEntry>,
}

impl Scanner {
    pub fn new(sources: SourceSet, pricing: PricingTable, store_path: impl Into<PathBuf>) -> Self {
        Self::with_store(sources, pricing, CursorStore::open(store_path.into()))
    }

    pub fn with_store(sources: SourceSet, pricing: PricingTable, store: CursorStore) -> Self {
        Self {
            sources,
            pricing,
            store,
            entries: BTreeMap::new(),
        }
    }

    /// Full scan: every file from offset zero, cursors rewritten.
    pub fn scan_all_usage(&mut self) -> ScanOutcome {
        self.run(ScanMode::Full)
    }

    /// Incremental continuation using the stored cursors.
    pub fn scan_all_usage_incremental(&mut self) -> ScanOutcome {
        self.run(ScanMode::Incremental)
    }

    fn run(&mut self, mode: ScanMode) -> ScanOutcome {
        let mut stats = ScanStats::default();
        // A fresh process has no accumulated entries to continue from,
        // so an incremental first call still reads every file in full to
        // return the complete set.
        let read_everything = mode == ScanMode::Full || self.entries.is_empty();
        if mode == ScanMode::Full {
            self.store.clear();
            self.entries.clear();
        }

        let files = self.sources.locate(&mut stats.issues);
        let located: HashSet<String> = files
            .iter()
            .map(|file| file.path.to_string_lossy().to_string())
            .collect();
        // Rotated-away files leave cursors behind; drop them so the
        // snapshot tracks what is actually on disk.
        self.store.retain(|path, _| located.contains(path));
        let mut tasks = Vec::new();
        for file in files {
            stats.files_scanned += 1;
            if let Some(task) = self.plan_file(file, read_everything, &mut stats) {
                tasks.push(task);
            }
        }

        let parsed_files = tasks
            .into_par_iter()
            .map(parse_task)
            .collect::<Vec<_>>();

        let now = Utc::now().to_rfc3339();
        for parsed in parsed_files {
            self.merge_file(parsed, &now, &mut stats);
        }
        if let Err(err) = self.store.persist() {
            // Losing cursors only costs a fuller re-read next time.
            warn!(error = %err, "failed to persist cursor store");
        }

        let mut entries: Vec<UsageEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
        info!(
            files = stats.files_scanned,
            skipped = stats.files_skipped,
            entries = entries.len(),
            issues = stats.issues.len(),
            "scan complete"
        );
        ScanOutcome { entries, stats }
    }

    /// Decides the read range for one located file, or skips it.
    fn plan_file(
        &self,
        file: SourceFile,
        read_everything: bool,
        stats: &mut ScanStats,
    ) -> Option<FileTask> {
        let file_path = file.path.to_string_lossy().to_string();
        let metadata = match fs::metadata(&file.path) {
            Ok(metadata) => metadata,
            Err(err) => {
                stats.files_skipped += 1;
                stats.issues.push(ScanIssue {
                    file_path,
                    message: err.to_string(),
                });
                return None;
            }
        };
        let file_size = metadata.len();
        let mtime = metadata
            .modified()
            .ok()
            .map(|time| {
                DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
            });

        let cursor = if read_everything {
            None
        } else {
            self.store.get(&file_path).filter(|cursor| {
                !cursor.is_stale(file_size, mtime.as_deref()) && cursor.byte_offset <= file_size
            })
        };

        match file.tool {
            Tool::OpenCode => {
                // Whole-file JSON: unchanged size and mtime means the
                // document was already ingested.
                if let Some(cursor) = cursor
                    && cursor.file_size == file_size
                    && cursor.mtime == mtime
                {
                    stats.files_skipped += 1;
                    return None;
                }
                Some(FileTask {
                    tool: file.tool,
                    path: file.path,
                    file_path,
                    file_size,
                    mtime,
                    start_offset: 0,
                    seed_model: None,
                    seed_totals: None,
                })
            }
            Tool::ClaudeCode | Tool::CodexCli => {
                let (start_offset, seed_model, seed_totals) = match cursor {
                    Some(cursor) => (
                        cursor.byte_offset,
                        cursor.last_model.clone(),
                        cursor.prev_totals,
                    ),
                    None => (0, None, None),
                };
                if start_offset >= file_size {
                    stats.files_skipped += 1;
                    return None;
                }
                Some(FileTask {
                    tool: file.tool,
                    path: file.path,
                    file_path,
                    file_size,
                    mtime,
                    start_offset,
                    seed_model,
                    seed_totals,
                })
            }
        }
    }

    fn merge_file(&mut self, parsed: ParsedFile, now: &str, stats: &mut ScanStats) {
        stats.bytes_read += parsed.bytes_read;
        stats.records_skipped += parsed.records_skipped;
        if let Some(message) = parsed.issue {
            warn!(file = %parsed.file_path, %message, "file-level scan issue");
            stats.issues.push(ScanIssue {
                file_path: parsed.file_path.clone(),
                message,
            });
        }
        for event in parsed.events {
            let quote = self.pricing.quote(&event.model, event.tokens);
            let key = entry_key(parsed.tool, &event);
            if self.entries.contains_key(&key) {
                stats.duplicates += 1;
                continue;
            }
            if !quote.priced {
                stats.unpriced += 1;
            }
            self.entries.insert(
                key,
                UsageEntry {
                    timestamp: event.ts,
                    tool: parsed.tool,
                    model: event.model,
                    tokens: event.tokens,
                    cost_usd: quote.cost_usd,
                    unpriced: !quote.priced,
                },
            );
        }
        if parsed.advanced {
            self.store.put(
                parsed.file_path,
                FileCursor {
                    byte_offset: parsed.start_offset + parsed.bytes_read,
                    file_size: parsed.file_size,
                    mtime: parsed.mtime,
                    updated_at: now.to_string(),
                    last_model: parsed.last_model,
                    prev_totals: parsed.prev_totals,
                },
            );
        }
    }
}

fn parse_task(task: FileTask) -> ParsedFile {
    debug!(file = %task.file_path, offset = task.start_offset, "parsing");
    match task.tool {
        Tool::ClaudeCode => {
            let result = parser::claude::parse(&task.path, task.start_offset);
            line_parsed(task, result)
        }
        Tool::CodexCli => {
            let seed_model = task.seed_model.clone();
            let seed_totals = task.seed_totals;
            let result = parser::codex::parse(&task.path, task.start_offset, seed_model, seed_totals);
            line_parsed(task, result)
        }
        Tool::OpenCode => match parser::opencode::parse(&task.path) {
            Ok(event) => ParsedFile {
                tool: task.tool,
                file_path: task.file_path,
                file_size: task.file_size,
                mtime: task.mtime,
                start_offset: 0,
                bytes_read: task.file_size,
                events: event.into_iter().collect(),
                records_skipped: 0,
                issue: None,
                last_model: None,
                prev_totals: None,
                advanced: true,
            },
            Err(err) => failed_file(task, err.to_string()),
        },
    }
}

fn line_parsed(task: FileTask, result: std::io::Result<LineParse>) -> ParsedFile {
    match result {
        Ok(parsed) => ParsedFile {
            tool: task.tool,
            file_path: task.file_path,
            file_size: task.file_size,
            mtime: task.mtime,
            start_offset: task.start_offset,
            bytes_read: parsed.bytes_read,
            events: parsed.events,
            records_skipped: parsed.records_skipped,
            issue: parsed.read_error,
            last_model: parsed.last_model,
            prev_totals: parsed.prev_totals,
            advanced: true,
        },
        Err(err) => failed_file(task, err.to_string()),
    }
}

fn failed_file(task: FileTask, message: String) -> ParsedFile {
    ParsedFile {
        tool: task.tool,
        file_path: task.file_path,
        file_size: task.file_size,
        mtime: task.mtime,
        start_offset: task.start_offset,
        bytes_read: 0,
        events: Vec::new(),
        records_skipped: 0,
        issue: Some(message),
        last_model: task.seed_model,
        prev_totals: task.seed_totals,
        advanced: false,
    }
}

/// Dedup identity: the source-provided id when present, otherwise the
/// exact (tool, model, timestamp, token counts) tuple — the defensive
/// fallback for sources without stable record ids.
fn entry_key(tool: Tool, event: &RawEvent) -> String {
    match &event.id {
        Some(id) => format!("{}:{}", tool.as_str(), id),
        None => format!(
            "{}:{}:{}:{}:{}:{}:{}",
            tool.as_str(),
            event.model,
            event.ts,
            event.tokens.input_tokens,
            event.tokens.output_tokens,
            event.tokens.cache_read_tokens,
            event.tokens.cache_write_tokens,
        ),
    }
}

fn order_key(entry: &UsageEntry) -> (&str, &str, &str, u64, u64, u64, u64) {
    (
        entry.timestamp.as_str(),
        entry.tool.as_str(),
        entry.model.as_str(),
        entry.tokens.input_tokens,
        entry.tokens.output_tokens,
        entry.tokens.cache_read_tokens,
        entry.tokens.cache_write_tokens,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: Option<&str>) -> RawEvent {
        RawEvent {
            ts: "2025-03-01T09:00:00.000Z".to_string(),
            model: "m1".to_string(),
            tokens: TokenCounts {
                input_tokens: 100,
                output_tokens: 50,
                cache_read_tokens: 7,
                cache_write_tokens: 3,
            },
            id: id.map(str::to_string),
        }
    }

    #[test]
    fn identity_key_prefers_the_source_id() {
        let key = entry_key(Tool::ClaudeCode, &event(Some("req_1:msg_1")));
        assert_eq!(key, "claude-code:req_1:msg_1");
    }

    #[test]
    fn fallback_key_is_the_exact_field_tuple() {
        let key = entry_key(Tool::CodexCli, &event(None));
        assert_eq!(key, "codex-cli:m1:2025-03-01T09:00:00.000Z:100:50:7:3");
    }
}
