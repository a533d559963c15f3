use serde::Serialize;

/// Scan summary returned alongside the merged entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub bytes_read: u64,
    pub records_skipped: usize,
    pub duplicates: usize,
    pub unpriced: usize,
    pub issues: Vec<ScanIssue>,
}

/// Non-fatal, per-file problems encountered during a scan. Issues never
/// abort the batch; the scan always completes for the remaining files.
#[derive(Debug, Clone, Serialize)]
pub struct ScanIssue {
    pub file_path: String,
    pub message: String,
}
