//! OpenCode message storage: one whole-file JSON document per message.
//! There is no meaningful byte offset; an unparseable document
//! invalidates the entire file for the pass (a file-level error, not a
//! record-level one).

use std::fs;
use std::path::Path;

use serde_json::Value;
use usage_core::{RawEvent, TokenCounts};

use super::{FileError, file_mtime_rfc3339, normalize_timestamp, value_u64};

pub(crate) fn parse(path: &Path) -> Result<Option<RawEvent>, FileError> {
    let raw = fs::read_to_string(path)?;
    let obj: Value = serde_json::from_str(&raw).map_err(FileError::Json)?;
    let tokens = TokenCounts {
        input_tokens: value_u64(obj.pointer("/tokens/input")),
        output_tokens: value_u64(obj.pointer("/tokens/output")),
        cache_read_tokens: value_u64(obj.pointer("/tokens/cache/read")),
        cache_write_tokens: value_u64(obj.pointer("/tokens/cache/write")),
    };
    if tokens.is_zero() {
        return Ok(None);
    }
    let model = obj
        .get("modelID")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown")
        .to_string();
    let ts = obj
        .pointer("/time/created")
        .and_then(normalize_timestamp)
        .or_else(|| file_mtime_rfc3339(path))
        .unwrap_or_default();
    let id = obj
        .get("id")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .or_else(|| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        });
    Ok(Some(RawEvent {
        ts,
        model,
        tokens,
        id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MESSAGE: &str = r#"{"id":"msg_oc_1","modelID":"claude-sonnet-4-20250514","time":{"created":1740823200000},"tokens":{"input":30,"output":10,"cache":{"read":5,"write":2}},"cost":0.123}"#;

    fn write_message(data: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("msg_oc_1.json");
        fs::write(&path, data).expect("write message");
        (dir, path)
    }

    #[test]
    fn parses_one_event_per_file() {
        let (_dir, path) = write_message(MESSAGE);
        let event = parse(&path).expect("parse").expect("event");
        assert_eq!(event.model, "claude-sonnet-4-20250514");
        assert_eq!(event.ts, "2025-03-01T10:00:00.000Z");
        assert_eq!(event.id.as_deref(), Some("msg_oc_1"));
        assert_eq!(event.tokens.input_tokens, 30);
        assert_eq!(event.tokens.cache_read_tokens, 5);
        assert_eq!(event.tokens.cache_write_tokens, 2);
    }

    #[test]
    fn unparseable_document_is_a_file_level_error() {
        let (_dir, path) = write_message("{ truncated");
        let err = parse(&path).expect_err("file error");
        assert!(matches!(err, FileError::Json(_)));
    }

    #[test]
    fn zero_usage_yields_no_event() {
        let (_dir, path) =
            write_message(r#"{"id":"msg_2","modelID":"m","tokens":{"input":0,"output":0}}"#);
        assert!(parse(&path).expect("parse").is_none());
    }

    #[test]
    fn falls_back_to_file_stem_identity() {
        let (_dir, path) = write_message(r#"{"modelID":"m","tokens":{"input":1,"output":0}}"#);
        let event = parse(&path).expect("parse").expect("event");
        assert_eq!(event.id.as_deref(), Some("msg_oc_1"));
    }
}
