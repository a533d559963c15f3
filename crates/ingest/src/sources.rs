use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use usage_core::Tool;
use walkdir::WalkDir;

use crate::types::ScanIssue;

struct SourceSpec {
    tool: Tool,
    roots: &'static [&'static str],
    extension: &'static str,
}

// Fixed per-tool log locations, relative to the home directory. The
// two Claude roots are aliases; dedup below keeps a file reachable via
// both from being scanned twice.
const SOURCE_SPECS: &[SourceSpec] = &[
    SourceSpec {
        tool: Tool::ClaudeCode,
        roots: &[".config/claude/projects", ".claude/projects"],
        extension: "jsonl",
    },
    SourceSpec {
        tool: Tool::CodexCli,
        roots: &[".codex/sessions"],
        extension: "jsonl",
    },
    SourceSpec {
        tool: Tool::OpenCode,
        roots: &[".local/share/opencode/storage/message"],
        extension: "json",
    },
];

pub fn default_home() -> PathBuf {
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home);
    }
    PathBuf::from(".")
}

/// One log file attributed to the tool whose pattern matched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub tool: Tool,
    pub path: PathBuf,
}

/// Resolves the fixed per-tool log locations under one home directory.
/// Only enumerates; never opens files.
#[derive(Debug, Clone)]
pub struct SourceSet {
    home: PathBuf,
}

impl SourceSet {
    pub fn from_env() -> Self {
        Self {
            home: default_home(),
        }
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Lists existing log files for every tool, deduplicated per tool by
    /// canonical path. A missing root means the tool is not installed
    /// and yields nothing; enumeration errors are downgraded to per-file
    /// issues.
    pub fn locate(&self, issues: &mut Vec<ScanIssue>) -> Vec<SourceFile> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for spec in SOURCE_SPECS {
            for root in spec.roots {
                let root = self.home.join(root);
                if !root.is_dir() {
                    continue;
                }
                for entry in WalkDir::new(&root).follow_links(true) {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(err) => {
                            let file_path = err
                                .path()
                                .map(|path| path.to_string_lossy().to_string())
                                .unwrap_or_else(|| "<unknown>".to_string());
                            issues.push(ScanIssue {
                                file_path,
                                message: err.to_string(),
                            });
                            continue;
                        }
                    };
                    let path = entry.path();
                    if !entry.file_type().is_file() || !has_extension(path, spec.extension) {
                        continue;
                    }
                    let canonical =
                        fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                    if seen.insert((spec.tool, canonical)) {
                        out.push(SourceFile {
                            tool: spec.tool,
                            path: path.to_path_buf(),
                        });
                    }
                }
            }
        }
        debug!(files = out.len(), home = %self.home.display(), "located source files");
        out
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .is_some_and(|value| value.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_roots_yield_empty_set() {
        let dir = tempdir().expect("tempdir");
        let mut issues = Vec::new();
        let files = SourceSet::with_home(dir.path()).locate(&mut issues);
        assert!(files.is_empty());
        assert!(issues.is_empty());
    }

    #[test]
    fn locates_and_attributes_files_per_tool() {
        let dir = tempdir().expect("tempdir");
        let claude = dir.path().join(".claude/projects/proj");
        let codex = dir.path().join(".codex/sessions/2025/03/01");
        let opencode = dir.path().join(".local/share/opencode/storage/message/ses");
        for path in [&claude, &codex, &opencode] {
            fs::create_dir_all(path).expect("mkdir");
        }
        fs::write(claude.join("a.jsonl"), "{}\n").expect("write");
        fs::write(claude.join("notes.txt"), "skip me").expect("write");
        fs::write(codex.join("rollout-1.jsonl"), "{}\n").expect("write");
        fs::write(opencode.join("msg_1.json"), "{}").expect("write");
        // Wrong extension for the OpenCode layout, even though JSONL
        // elsewhere is fine.
        fs::write(opencode.join("msg_2.jsonl"), "{}\n").expect("write");

        let mut issues = Vec::new();
        let mut files = SourceSet::with_home(dir.path()).locate(&mut issues);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        assert!(issues.is_empty());
        let tools: Vec<Tool> = files.iter().map(|file| file.tool).collect();
        assert_eq!(files.len(), 3);
        assert!(tools.contains(&Tool::ClaudeCode));
        assert!(tools.contains(&Tool::CodexCli));
        assert!(tools.contains(&Tool::OpenCode));
    }

    #[cfg(unix)]
    #[test]
    fn alias_roots_reaching_one_file_scan_it_once() {
        let dir = tempdir().expect("tempdir");
        let real = dir.path().join(".claude/projects/proj");
        fs::create_dir_all(&real).expect("mkdir");
        fs::write(real.join("a.jsonl"), "{}\n").expect("write");
        fs::create_dir_all(dir.path().join(".config")).expect("mkdir");
        std::os::unix::fs::symlink(dir.path().join(".claude"), dir.path().join(".config/claude"))
            .expect("symlink");

        let mut issues = Vec::new();
        let files = SourceSet::with_home(dir.path()).locate(&mut issues);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].tool, Tool::ClaudeCode);
    }
}
