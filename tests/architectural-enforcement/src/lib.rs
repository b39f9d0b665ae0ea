//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No thread sleeps in production code
//! - No blocking I/O inside async functions
//! - No `unwrap()` / `expect()` outside tests
//!
//! These tests are designed to catch violations early in the development cycle.
//! The helpers here scan source text line by line; they are heuristics, not a
//! parser.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots of the workspace
pub const PRODUCTION_ROOTS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// Workspace root, resolved from this package's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// One scanned source file
#[derive(Debug)]
pub struct SourceFile {
    /// Path for reporting
    pub path: PathBuf,
    lines: Vec<String>,
}

impl SourceFile {
    /// Read a file, or `None` if it cannot be read
    pub fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Some(Self::from_source(path, &content))
    }

    /// Build from in-memory source text
    pub fn from_source(path: &Path, content: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Lines before the first `#[cfg(test)]` module, with comments stripped
    ///
    /// Yields `(line_number, code)` pairs, 1-based.
    pub fn production_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        let end = self
            .lines
            .iter()
            .position(|line| line.trim().starts_with("#[cfg(test)]"))
            .unwrap_or(self.lines.len());

        self.lines[..end]
            .iter()
            .enumerate()
            .map(|(idx, line)| (idx + 1, code_part(line)))
            .filter(|(_, code)| !code.trim().is_empty())
    }

    /// Whether the line at 1-based `line_number` sits inside an `async fn`
    ///
    /// Scans backwards to the nearest function signature.
    pub fn in_async_fn(&self, line_number: usize) -> bool {
        for line in self.lines[..line_number.saturating_sub(1)].iter().rev() {
            let code = code_part(line);
            if code.contains("async fn ") {
                return true;
            }
            if code.contains("fn ") {
                return false;
            }
            let trimmed = code.trim_start();
            if trimmed.starts_with("mod ") || trimmed.starts_with("impl") {
                return false;
            }
        }
        false
    }

    /// Format a violation at `line_number`
    pub fn violation(&self, line_number: usize, what: &str) -> String {
        let line = self
            .lines
            .get(line_number.saturating_sub(1))
            .map(|l| l.trim())
            .unwrap_or_default();
        format!("{}:{} - {}: {}", self.path.display(), line_number, what, line)
    }
}

/// Strip doc and line comments
fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Every `.rs` file under the production roots
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut sources = Vec::new();

    for dir in PRODUCTION_ROOTS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                if let Some(source) = SourceFile::read(entry.path()) {
                    sources.push(source);
                }
            }
        }
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &str) -> SourceFile {
        SourceFile::from_source(Path::new("sample.rs"), text)
    }

    #[test]
    fn test_test_module_is_not_production() {
        let file = source("fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n");
        let lines: Vec<_> = file.production_lines().collect();
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_comments_are_stripped() {
        let file = source("let a = 1; // a.unwrap()\n/// docs\n");
        let lines: Vec<_> = file.production_lines().collect();
        assert_eq!(lines, vec![(1, "let a = 1; ")]);
    }

    #[test]
    fn test_async_fn_detection() {
        let file = source(
            "async fn bad() {\n    std::fs::read(\"x\");\n}\nfn fine() {\n    std::fs::read(\"x\");\n}\n",
        );
        assert!(file.in_async_fn(2));
        assert!(!file.in_async_fn(5));
    }

    #[test]
    fn test_workspace_has_production_sources() {
        assert!(!production_sources().is_empty());
    }
}
