//! Architectural Enforcement
//!
//! Source scans shared by the integration tests in `tests/`. They enforce:
//! - No `unwrap()`/`expect()` in production code (errors are propagated)
//! - No thread-blocking sleep in production code (roles run on tokio)
//!
//! "Production code" is every line of `samples/*/src` above the first
//! `#[cfg(test)]` of its file.

use std::fs;
use std::path::{Path, PathBuf};

/// Crate source directories scanned, relative to the workspace root
pub const SOURCE_DIRS: &[&str] = &["samples/core/src", "samples/runner/src"];

/// One offending line
#[derive(Debug)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// The line, trimmed
    pub line: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line_number, self.line)
    }
}

/// The workspace root (two levels above this crate)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under [`SOURCE_DIRS`]
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    SOURCE_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(|e| e.into_path())
        })
        .collect()
}

/// Code lines of `content` above its first `#[cfg(test)]`, comments stripped
///
/// Yields `(line_number, code_part, full_line)`.
pub fn production_lines(content: &str) -> impl Iterator<Item = (usize, &str, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(idx, line)| {
            let code_part = line.split("//").next().unwrap_or(line);
            (idx + 1, code_part, line)
        })
}

/// Scan every production line with `is_violation`
pub fn find_violations(is_violation: impl Fn(&str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();

    for path in production_sources() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line_number, code_part, line) in production_lines(&content) {
            if is_violation(code_part) {
                violations.push(Violation {
                    path: path.clone(),
                    line_number,
                    line: line.trim().to_string(),
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n// x.unwrap()\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines: Vec<_> = production_lines(content).map(|(n, code, _)| (n, code)).collect();
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_sources_found() {
        assert!(production_sources()
            .iter()
            .any(|p| p.ends_with("samples/core/src/lib.rs")));
    }
}
