//! Claude Code project logs: line-delimited JSON, one independent
//! record per line. Malformed lines are skipped individually.

use std::io;
use std::path::Path;

use serde_json::Value;
use usage_core::{RawEvent, TokenCounts};

use super::{
    LineParse, file_mtime_rfc3339, find_string, normalize_timestamp, open_aligned,
    parse_json_line, read_lines, value_u64,
};

pub(crate) fn parse(path: &Path, start_offset: u64) -> io::Result<LineParse> {
    let (mut reader, aligned) = open_aligned(path, start_offset)?;
    let fallback_ts = file_mtime_rfc3339(path).unwrap_or_default();
    let mut out = LineParse {
        bytes_read: aligned,
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
        if let Some(event) = event_from_value(&obj, &fallback_ts) {
            out.events.push(event);
        }
    });
    out.bytes_read += bytes;
    out.read_error = read_error;
    Ok(out)
}

fn event_from_value(obj: &Value, fallback_ts: &str) -> Option<RawEvent> {
    let usage = obj.get("message").and_then(|message| message.get("usage"))?;
    let tokens = TokenCounts {
        input_tokens: value_u64(usage.get("input_tokens")),
        output_tokens: value_u64(usage.get("output_tokens")),
        cache_read_tokens: value_u64(usage.get("cache_read_input_tokens")),
        cache_write_tokens: value_u64(usage.get("cache_creation_input_tokens")),
    };
    if tokens.is_zero() {
        return None;
    }
    let model = find_string(obj, &[&["message", "model"], &["model"]])
        .unwrap_or("unknown")
        .to_string();
    let ts = obj
        .get("timestamp")
        .and_then(normalize_timestamp)
        .unwrap_or_else(|| fallback_ts.to_string());
    // Any costUSD the log carries is ignored; cost is always recomputed
    // from the token counts and the pricing table.
    let id = identity(obj);
    Some(RawEvent {
        ts,
        model,
        tokens,
        id,
    })
}

fn identity(obj: &Value) -> Option<String> {
    let request_id = find_string(obj, &[&["requestId"], &["request_id"]]);
    let message_id = find_string(obj, &[&["message", "id"]]);
    match (request_id, message_id) {
        (Some(request), Some(message)) => Some(format!("{}:{}", request, message)),
        (Some(request), None) => Some(request.to_string()),
        (None, Some(message)) => Some(message.to_string()),
        (None, None) => None,
    }
}
