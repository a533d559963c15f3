//! Codex CLI session rollouts: line-delimited JSON. The model lives in
//! `session_meta`/`turn_context` lines earlier than the usage events,
//! and usage arrives either per turn (`last_token_usage`) or as a
//! cumulative counter (`total_token_usage`) that must be differenced.
//! Both pieces of context are carried in the file cursor so a resumed
//! scan picks up exactly where the previous one stopped.

use std::io;
use std::path::Path;

use serde_json::Value;
use usage_core::{RawEvent, TokenCounts};

use super::{
    LineParse, file_mtime_rfc3339, find_string, normalize_timestamp, open_aligned,
    parse_json_line, read_lines, value_u64,
};

pub(crate) fn parse(
    path: &Path,
    start_offset: u64,
    seed_model: Option<String>,
    seed_totals: Option<TokenCounts>,
) -> io::Result<LineParse> {
    let (mut reader, aligned) = open_aligned(path, start_offset)?;
    let fallback_ts = file_mtime_rfc3339(path).unwrap_or_default();
    let mut out = LineParse {
        bytes_read: aligned,
        last_model: seed_model,
        prev_totals: seed_totals,
        ..LineParse::default()
    };
    let (bytes, read_error) = read_lines(&mut reader, |line| {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Some(obj) = parse_json_line(line) else {
            out.records_skipped += 1;
            return;
        };
        if let Some(model) = extract_model(&obj) {
            out.last_model = Some(model);
        }
        let Some(tokens) = extract_tokens(&obj, &mut out.prev_totals) else {
            return;
        };
        if tokens.is_zero() {
            return;
        }
        // A rollout tail read past its context lines carries no model;
        // Codex sessions default to gpt-5.
        let model = out
            .last_model
            .clone()
            .unwrap_or_else(|| "gpt-5".to_string());
        let ts = extract_timestamp(&obj).unwrap_or_else(|| fallback_ts.clone());
        let id = extract_request_id(&obj);
        out.events.push(RawEvent {
            ts,
            model,
            tokens,
            id,
        });
    });
    out.bytes_read += bytes;
    out.read_error = read_error;
    Ok(out)
}

fn extract_model(value: &Value) -> Option<String> {
    find_string(
        value,
        &[
            &["model"],
            &["payload", "model"],
            &["payload", "info", "model"],
            &["payload", "info", "model_name"],
            &["payload", "info", "metadata", "model"],
        ],
    )
    .map(str::to_string)
}

fn extract_timestamp(value: &Value) -> Option<String> {
    for key in ["timestamp", "ts", "time", "created_at"] {
        if let Some(found) = value.get(key)
            && let Some(ts) = normalize_timestamp(found)
        {
            return Some(ts);
        }
    }
    None
}

fn extract_request_id(value: &Value) -> Option<String> {
    find_string(
        value,
        &[
            &["request_id"],
            &["requestId"],
            &["payload", "request_id"],
            &["payload", "info", "request_id"],
        ],
    )
    .map(str::to_string)
}

/// Usage from a `token_count` payload: per-turn counts when present,
/// otherwise the delta against the previous cumulative totals. A
/// counter that went backwards means the session restarted; the current
/// value is then taken as-is.
fn extract_tokens(value: &Value, prev_totals: &mut Option<TokenCounts>) -> Option<TokenCounts> {
    if value.get("type")?.as_str()? != "event_msg" {
        return None;
    }
    let payload = value.get("payload")?;
    if payload.get("type")?.as_str()? != "token_count" {
        return None;
    }
    let info = payload.get("info")?;
    if info.is_null() {
        return None;
    }
    if let Some(last) = info.get("last_token_usage") {
        return Some(usage_counts(last));
    }
    let total = info.get("total_token_usage")?;
    let current = usage_counts(total);
    let delta = match prev_totals.as_ref() {
        Some(prev) if current.total() >= prev.total() => current.saturating_delta(prev),
        _ => current,
    };
    *prev_totals = Some(current);
    Some(delta)
}

fn usage_counts(usage: &Value) -> TokenCounts {
    TokenCounts {
        input_tokens: value_u64(usage.get("input_tokens")),
        output_tokens: value_u64(usage.get("output_tokens")),
        cache_read_tokens: value_u64(
            usage
                .get("cached_input_tokens")
                .or_else(|| usage.get("cache_read_input_tokens")),
        ),
        // Codex rollouts do not report cache writes.
        cache_write_tokens: 0,
    }
}
