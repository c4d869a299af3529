//! Builds a [`RepositoryIndex`] from a working tree on disk.

use super::{BuildInfo, FileMetadata, IndexHeader, RepositoryIndex};
use crate::error::IndexError;
use crate::git;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::fs;
use std::path::{Component, Path};
use std::time::{Duration, Instant};

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_BATCH_SIZE: usize = 64;

/// Commit recorded for trees that are not git work trees (or have no HEAD yet).
pub const WORKTREE_COMMIT: &str = "worktree";

/// Directories never descended into by the fallback scan.
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    "bower_components",
    "venv",
    "coverage",
];

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub branch: Option<String>,
    /// Overrides the commit read from HEAD.
    pub commit: Option<String>,
    /// Glob patterns; empty means every file.
    pub file_patterns: Vec<String>,
    pub max_file_size: u64,
    pub batch_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            branch: None,
            commit: None,
            file_patterns: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: None,
        }
    }
}

impl IndexOptions {
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.file_patterns = patterns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

enum FileOutcome {
    Indexed(String, FileMetadata),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct IndexBuilder {
    options: IndexOptions,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new(IndexOptions::default())
    }
}

impl IndexBuilder {
    pub fn new(options: IndexOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Index the tree at `root`. Only a missing or unusable root is an error;
    /// unreadable files are left out and counted in `skipped_files`.
    pub fn build(&self, root: &Path, repo_url: &str) -> Result<RepositoryIndex, IndexError> {
        let start = Instant::now();
        let deadline = self.options.timeout.map(|t| start + t);

        if !root.exists() {
            return Err(IndexError::RootNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(IndexError::RootNotDirectory(root.to_path_buf()));
        }

        let patterns = compile_patterns(&self.options.file_patterns)?;

        let candidates = match git::tracked_files(root) {
            Some(files) => {
                tracing::debug!("Listing {} tracked files from git index", files.len());
                files
            }
            None => {
                tracing::debug!("No git work tree at {:?}, scanning directory", root);
                scan_directory(root)
            }
        };

        let candidates: Vec<String> = match patterns {
            Some(ref set) => candidates.into_iter().filter(|p| set.is_match(p)).collect(),
            None => candidates,
        };

        let batch_size = self.options.batch_size.max(1);
        let mut entries = Vec::with_capacity(candidates.len());
        let mut skipped_files = 0;
        let mut partial = false;

        for batch in candidates.chunks(batch_size) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    "Index build for {} hit its deadline after {} of {} files",
                    repo_url,
                    entries.len() + skipped_files,
                    candidates.len()
                );
                partial = true;
                break;
            }

            let outcomes: Vec<FileOutcome> = batch
                .par_iter()
                .map(|relative| self.index_file(root, relative))
                .collect();

            for outcome in outcomes {
                match outcome {
                    FileOutcome::Indexed(path, meta) => entries.push((path, meta)),
                    FileOutcome::Skipped => skipped_files += 1,
                }
            }
        }

        let commit_hash = self
            .options
            .commit
            .clone()
            .or_else(|| git::head_commit(root))
            .unwrap_or_else(|| WORKTREE_COMMIT.to_string());
        let branch = self
            .options
            .branch
            .clone()
            .or_else(|| git::current_branch(root));

        let header = IndexHeader {
            repo_url: repo_url.to_string(),
            branch,
            commit_hash,
            indexed_at: Utc::now(),
        };
        let index = RepositoryIndex::assemble(
            header,
            entries,
            BuildInfo {
                build_duration_ms: start.elapsed().as_millis() as u64,
                skipped_files,
                partial,
            },
        );

        let stats = index.stats();
        tracing::info!(
            "Indexed {} files ({} lines, {} skipped) for {} at {} in {}ms",
            stats.total_files,
            stats.total_lines,
            stats.skipped_files,
            repo_url,
            index.commit_hash(),
            stats.build_duration_ms
        );

        Ok(index)
    }

    fn index_file(&self, root: &Path, relative: &str) -> FileOutcome {
        let path = root.join(relative);

        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", relative, e);
                return FileOutcome::Skipped;
            }
        };
        if !meta.is_file() {
            return FileOutcome::Skipped;
        }
        if meta.len() > self.options.max_file_size {
            tracing::debug!(
                "Skipping large file {} ({} bytes > {})",
                relative,
                meta.len(),
                self.options.max_file_size
            );
            return FileOutcome::Skipped;
        }

        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("Skipping unreadable {}: {}", relative, e);
                return FileOutcome::Skipped;
            }
        };

        let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);
        FileOutcome::Indexed(
            relative.to_string(),
            FileMetadata::from_bytes(relative, &bytes, modified_at),
        )
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Option<GlobSet>, IndexError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| IndexError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| IndexError::InvalidPattern {
            pattern: patterns.join(","),
            reason: e.to_string(),
        })
}

/// Recursive scan used when there is no git index to list from.
fn scan_directory(root: &Path) -> Vec<String> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e.file_name().to_str().unwrap_or("")))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?;
            to_index_path(relative)
        })
        .collect()
}

fn is_excluded(name: &str) -> bool {
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name)
}

/// Relative path with `/` separators, or `None` if it is not valid UTF-8.
fn to_index_path(relative: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    parts.map(|p| p.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, relative: &str, content: &str) {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_root_fails_fast() {
        let result = IndexBuilder::default().build(Path::new("/nonexistent/repo"), "repo");
        assert!(matches!(result, Err(IndexError::RootNotFound(_))));
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = TempDir::new().unwrap();
        write(&dir, "file.txt", "x");
        let result = IndexBuilder::default().build(&dir.path().join("file.txt"), "repo");
        assert!(matches!(result, Err(IndexError::RootNotDirectory(_))));
    }

    #[test]
    fn test_directory_scan_skips_hidden_and_vendor() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/app.ts", "export function app() {}\n");
        write(&dir, "src/lib/util.ts", "export const x = 1;\nexport const y = 2;\n");
        write(&dir, "node_modules/pkg/index.js", "module.exports = {};\n");
        write(&dir, ".cache/data.json", "{}");
        write(&dir, "target/debug/out.rs", "fn main() {}\n");

        let index = IndexBuilder::default().build(dir.path(), "local").unwrap();

        assert!(index.contains("src/app.ts"));
        assert!(index.contains("src/lib/util.ts"));
        assert!(!index.contains("node_modules/pkg/index.js"));
        assert!(!index.contains(".cache/data.json"));
        assert!(!index.contains("target/debug/out.rs"));
        assert_eq!(index.commit_hash(), WORKTREE_COMMIT);

        let stats = index.stats();
        assert_eq!(stats.total_files, index.files().len());
        assert_eq!(stats.total_lines, index.recount_lines());
        assert_eq!(stats.total_lines, 3);
        assert_eq!(index.metadata("src/lib/util.ts").unwrap().line_count, 2);
    }

    #[test]
    fn test_prefers_git_index() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        write(&dir, "tracked.rs", "fn tracked() {}\n");
        write(&dir, "scratch.rs", "fn scratch() {}\n");

        let mut git_index = repo.index().unwrap();
        git_index.add_path(Path::new("tracked.rs")).unwrap();
        git_index.write().unwrap();

        let index = IndexBuilder::default().build(dir.path(), "local").unwrap();
        assert!(index.contains("tracked.rs"));
        assert!(!index.contains("scratch.rs"));
    }

    #[test]
    fn test_unreadable_tracked_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        write(&dir, "kept.rs", "fn kept() {}\n");
        write(&dir, "deleted.rs", "fn deleted() {}\n");

        let mut git_index = repo.index().unwrap();
        git_index.add_path(Path::new("kept.rs")).unwrap();
        git_index.add_path(Path::new("deleted.rs")).unwrap();
        git_index.write().unwrap();
        fs::remove_file(dir.path().join("deleted.rs")).unwrap();

        let index = IndexBuilder::default().build(dir.path(), "local").unwrap();

        assert!(index.contains("kept.rs"));
        assert!(!index.contains("deleted.rs"));
        let stats = index.stats();
        assert_eq!(stats.skipped_files, 1);
        assert!(!stats.partial);
        assert_eq!(stats.total_files, index.files().len());
        assert_eq!(stats.total_lines, index.recount_lines());
    }

    #[test]
    fn test_size_ceiling_skips_large_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "small.ts", "a\n");
        write(&dir, "big.ts", &"x".repeat(2048));

        let options = IndexOptions {
            max_file_size: 1024,
            ..Default::default()
        };
        let index = IndexBuilder::new(options).build(dir.path(), "local").unwrap();

        assert!(index.contains("small.ts"));
        assert!(!index.contains("big.ts"));
        assert_eq!(index.stats().skipped_files, 1);
    }

    #[test]
    fn test_file_patterns_filter() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/a.ts", "a\n");
        write(&dir, "src/b.py", "b\n");

        let options = IndexOptions::default().with_patterns(vec!["**/*.ts".to_string()]);
        let index = IndexBuilder::new(options).build(dir.path(), "local").unwrap();

        assert!(index.contains("src/a.ts"));
        assert!(!index.contains("src/b.py"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let dir = TempDir::new().unwrap();
        let options = IndexOptions::default().with_patterns(vec!["src/[".to_string()]);
        let result = IndexBuilder::new(options).build(dir.path(), "local");
        assert!(matches!(result, Err(IndexError::InvalidPattern { .. })));
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.ts", "function foo(){}\n");
        write(&dir, "b.ts", "function bar(){}\n");

        let builder = IndexBuilder::new(IndexOptions::default().with_commit("abc123"));
        let first = builder.build(dir.path(), "local").unwrap();
        let second = builder.build(dir.path(), "local").unwrap();

        assert_eq!(first.content_hashes(), second.content_hashes());
        assert_eq!(first.commit_hash(), "abc123");
    }

    #[test]
    fn test_zero_timeout_returns_consistent_partial_index() {
        let dir = TempDir::new().unwrap();
        for i in 0..10 {
            write(&dir, &format!("f{}.ts", i), "x\n");
        }

        let options = IndexOptions {
            batch_size: 2,
            timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        let index = IndexBuilder::new(options).build(dir.path(), "local").unwrap();

        assert!(index.stats().partial);
        assert_eq!(index.stats().total_files, index.files().len());
        assert_eq!(index.stats().total_lines, index.recount_lines());
    }
}
