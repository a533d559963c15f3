//! One capability, three formats: produce `RawEvent`s from a byte range
//! of one log file. Line-delimited variants (Claude Code, Codex CLI)
//! resume from a byte offset with line-boundary alignment; OpenCode is
//! whole-file JSON and always re-parses, relying on downstream dedup.

pub(crate) mod claude;
pub(crate) mod codex;
pub(crate) mod opencode;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use usage_core::{RawEvent, TokenCounts};

/// Result of one pass over a line-delimited log.
#[derive(Debug, Default)]
pub(crate) struct LineParse {
    pub events: Vec<RawEvent>,
    /// Bytes consumed from the start offset over complete lines only; a
    /// read error stops the pass without advancing past the bad bytes.
    pub bytes_read: u64,
    pub records_skipped: usize,
    pub read_error: Option<String>,
    pub last_model: Option<String>,
    pub prev_totals: Option<TokenCounts>,
}

/// A file-level parse failure (unreadable file or, for whole-file JSON
/// sources, an unparseable document).
#[derive(Debug)]
pub(crate) enum FileError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::Io(err) => write!(f, "read failed: {}", err),
            FileError::Json(err) => write!(f, "unparseable JSON: {}", err),
        }
    }
}

impl From<io::Error> for FileError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub(crate) fn parse_json_line(line: &str) -> Option<Value> {
    serde_json::from_str(line).ok()
}

pub(crate) fn find_string<'a>(value: &'a Value, paths: &[&[&str]]) -> Option<&'a str> {
    for path in paths {
        let mut current = value;
        let mut ok = true;
        for key in *path {
            if let Some(next) = current.get(*key) {
                current = next;
            } else {
                ok = false;
                break;
            }
        }
        if ok && let Some(found) = current.as_str() {
            return Some(found);
        }
    }
    None
}

pub(crate) fn value_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(number)) => number
            .as_u64()
            .unwrap_or_else(|| number.as_i64().unwrap_or(0).max(0) as u64),
        Some(Value::String(text)) => text.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

fn normalize_epoch(epoch: i64) -> Option<String> {
    let (secs, nanos) = if epoch.unsigned_abs() >= 1_000_000_000_000 {
        (epoch / 1000, (epoch % 1000).unsigned_abs() as u32 * 1_000_000)
    } else {
        (epoch, 0)
    };
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Accepts RFC 3339 (any offset), naive date-times, and epoch seconds or
/// milliseconds (string or number); yields canonical UTC with
/// millisecond precision.
pub(crate) fn normalize_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(
                    parsed
                        .with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                );
            }
            if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
                let dt = DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc);
                return Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true));
            }
            if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
                let dt = DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc);
                return Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true));
            }
            if raw.chars().all(|ch| ch.is_ascii_digit()) {
                return raw.parse::<i64>().ok().and_then(normalize_epoch);
            }
            None
        }
        Value::Number(number) => {
            if let Some(epoch) = number.as_i64() {
                return normalize_epoch(epoch);
            }
            number
                .as_u64()
                .filter(|value| *value <= i64::MAX as u64)
                .and_then(|value| normalize_epoch(value as i64))
        }
        _ => None,
    }
}

pub(crate) fn file_mtime_rfc3339(path: &Path) -> Option<String> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let dt: DateTime<Utc> = modified.into();
    Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Opens `path` positioned at `offset`, aligned to a line boundary.
///
/// If the byte before the offset is not a newline, the remainder of that
/// partial line is consumed and counted, so the caller's next cursor
/// offset stays consistent with what was actually parsed.
pub(crate) fn open_aligned(path: &Path, offset: u64) -> io::Result<(BufReader<File>, u64)> {
    let mut file = File::open(path)?;
    if offset == 0 {
        return Ok((BufReader::new(file), 0));
    }
    file.seek(SeekFrom::Start(offset - 1))?;
    let mut byte = [0u8; 1];
    let read = file.read(&mut byte)?;
    let mut reader = BufReader::new(file);
    let mut consumed = 0u64;
    if read == 1 && byte[0] != b'\n' {
        let mut rest = Vec::new();
        consumed = reader.read_until(b'\n', &mut rest)? as u64;
    }
    Ok((reader, consumed))
}

/// Calls `handle` with each line (trailing newline stripped). Returns
/// the bytes consumed and, on a read failure, its message; the failure
/// ends the pass but keeps everything parsed so far.
///
/// A final line without a trailing newline may be a writer caught
/// mid-append. It is still handed to `handle` (a finished file need not
/// end in a newline), but its bytes are NOT counted, so the cursor
/// stays before it and the next scan re-reads the completed line.
/// Identity dedup suppresses the re-emit.
pub(crate) fn read_lines<F>(reader: &mut BufReader<File>, mut handle: F) -> (u64, Option<String>)
where
    F: FnMut(&str),
{
    let mut buf = String::new();
    let mut bytes = 0u64;
    loop {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => return (bytes, None),
            Ok(read) => {
                let terminated = buf.ends_with('\n');
                if terminated {
                    bytes = bytes.saturating_add(read as u64);
                }
                handle(buf.trim_end_matches(['\n', '\r']));
                if !terminated {
                    return (bytes, None);
                }
            }
            Err(err) => return (bytes, Some(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_offset_timestamps_to_utc_millis() {
        let value = json!("2025-03-01T12:30:00+02:00");
        assert_eq!(
            normalize_timestamp(&value).as_deref(),
            Some("2025-03-01T10:30:00.000Z")
        );
    }

    #[test]
    fn normalizes_epoch_seconds_and_millis() {
        assert_eq!(
            normalize_timestamp(&json!(1740823200)).as_deref(),
            Some("2025-03-01T10:00:00.000Z")
        );
        assert_eq!(
            normalize_timestamp(&json!(1740823200123i64)).as_deref(),
            Some("2025-03-01T10:00:00.123Z")
        );
        assert_eq!(
            normalize_timestamp(&json!("1740823200")).as_deref(),
            Some("2025-03-01T10:00:00.000Z")
        );
    }

    #[test]
    fn rejects_unusable_timestamps() {
        assert!(normalize_timestamp(&json!("")).is_none());
        assert!(normalize_timestamp(&json!("soon")).is_none());
        assert!(normalize_timestamp(&json!(null)).is_none());
    }

    #[test]
    fn coerces_token_counts_from_numbers_and_strings() {
        assert_eq!(value_u64(Some(&json!(42))), 42);
        assert_eq!(value_u64(Some(&json!("17"))), 17);
        assert_eq!(value_u64(Some(&json!(-3))), 0);
        assert_eq!(value_u64(None), 0);
    }
}
