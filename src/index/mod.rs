//! Immutable per-commit repository index
//!
//! A [`RepositoryIndex`] answers "does this file exist", "how many lines does it
//! have" and "what is its content hash" without touching the filesystem. It is
//! produced by [`builder::IndexBuilder`] and never mutated afterwards.

pub mod builder;

pub use builder::{IndexBuilder, IndexOptions};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Extensions the snippet locator is allowed to open.
pub const SEARCHABLE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "java", "kt", "swift", "c", "cc",
    "cpp", "h", "hpp", "cs", "rb", "php", "scala", "vue", "svelte", "html", "css", "scss", "json",
    "yaml", "yml", "toml", "sql", "sh",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub line_count: usize,
    pub byte_size: u64,
    pub content_hash: String,
    /// Lower-cased, without the dot. Empty when the file has no extension.
    pub extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl FileMetadata {
    pub fn from_bytes(path: &str, bytes: &[u8], modified_at: Option<DateTime<Utc>>) -> Self {
        let extension = extension_of(path);
        Self {
            line_count: count_lines(bytes),
            byte_size: bytes.len() as u64,
            content_hash: hash_bytes(bytes),
            language: language_for_extension(&extension).map(str::to_string),
            extension,
            modified_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_lines: usize,
    pub total_bytes: u64,
    pub languages: BTreeMap<String, usize>,
    pub build_duration_ms: u64,
    /// Files dropped because they were unreadable or over the size ceiling.
    pub skipped_files: usize,
    /// True when the build stopped at its deadline.
    pub partial: bool,
}

/// Identity of an index: which snapshot it describes and when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub repo_url: String,
    pub branch: Option<String>,
    pub commit_hash: String,
    pub indexed_at: DateTime<Utc>,
}

/// Bookkeeping carried over from the build that is not derivable from the files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub build_duration_ms: u64,
    pub skipped_files: usize,
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryIndex {
    header: IndexHeader,
    stats: IndexStats,
    files: BTreeSet<String>,
    metadata: BTreeMap<String, FileMetadata>,
    content_hashes: BTreeMap<String, String>,
    by_extension: BTreeMap<String, Vec<String>>,
}

impl RepositoryIndex {
    /// Assemble an index from per-file metadata. All derived maps and the
    /// aggregate stats are computed here, so they always agree with each other.
    pub fn assemble(
        header: IndexHeader,
        entries: impl IntoIterator<Item = (String, FileMetadata)>,
        build: BuildInfo,
    ) -> Self {
        let metadata: BTreeMap<String, FileMetadata> = entries.into_iter().collect();

        let mut files = BTreeSet::new();
        let mut content_hashes = BTreeMap::new();
        let mut by_extension: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut stats = IndexStats {
            build_duration_ms: build.build_duration_ms,
            skipped_files: build.skipped_files,
            partial: build.partial,
            ..Default::default()
        };

        for (path, meta) in &metadata {
            files.insert(path.clone());
            content_hashes.insert(path.clone(), meta.content_hash.clone());
            by_extension
                .entry(meta.extension.clone())
                .or_default()
                .push(path.clone());

            stats.total_lines += meta.line_count;
            stats.total_bytes += meta.byte_size;
            if let Some(ref language) = meta.language {
                *stats.languages.entry(language.clone()).or_insert(0) += 1;
            }
        }
        stats.total_files = files.len();

        Self {
            header,
            stats,
            files,
            metadata,
            content_hashes,
            by_extension,
        }
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn repo_url(&self) -> &str {
        &self.header.repo_url
    }

    pub fn branch(&self) -> Option<&str> {
        self.header.branch.as_deref()
    }

    pub fn commit_hash(&self) -> &str {
        &self.header.commit_hash
    }

    pub fn indexed_at(&self) -> DateTime<Utc> {
        self.header.indexed_at
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    pub fn metadata(&self, path: &str) -> Option<&FileMetadata> {
        self.metadata.get(path)
    }

    pub fn content_hash(&self, path: &str) -> Option<&str> {
        self.content_hashes.get(path).map(String::as_str)
    }

    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &FileMetadata)> {
        self.metadata.iter()
    }

    pub fn content_hashes(&self) -> &BTreeMap<String, String> {
        &self.content_hashes
    }

    pub fn extension_index(&self) -> &BTreeMap<String, Vec<String>> {
        &self.by_extension
    }

    pub fn files_with_extension(&self, extension: &str) -> &[String] {
        self.by_extension
            .get(&extension.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Indexed files the locator may open, in path order.
    pub fn searchable_files(&self) -> impl Iterator<Item = &str> {
        let mut files: Vec<&str> = SEARCHABLE_EXTENSIONS
            .iter()
            .flat_map(|ext| self.files_with_extension(ext))
            .map(String::as_str)
            .collect();
        files.sort_unstable();
        files.into_iter()
    }

    /// Summed line counts, recomputed from the metadata map.
    pub fn recount_lines(&self) -> usize {
        self.metadata.values().map(|m| m.line_count).sum()
    }
}

/// SHA-256 of the bytes, lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Number of lines as an editor would show them; a trailing newline does not
/// start a new line.
pub fn count_lines(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count();
    if bytes.last() == Some(&b'\n') {
        newlines
    } else {
        newlines + 1
    }
}

pub fn extension_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

pub fn language_for_extension(extension: &str) -> Option<&'static str> {
    let language = match extension {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" | "cxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "scala" => "scala",
        "vue" => "vue",
        "svelte" => "svelte",
        "html" | "htm" => "html",
        "css" | "scss" | "sass" | "less" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "sql" => "sql",
        "sh" | "bash" | "zsh" => "shell",
        _ => return None,
    };
    Some(language)
}


#[cfg(test)]
mod tests {
    use super::testing::index_of;
    use super::*;

    #[test]
    fn test_assemble_keeps_invariants() {
        let index = index_of(&[
            ("src/a.ts", "const a = 1;\nconst b = 2;\n"),
            ("src/b.rs", "fn main() {}"),
            ("README", ""),
        ]);

        let stats = index.stats();
        assert_eq!(stats.total_files, index.files().len());
        assert_eq!(stats.total_lines, index.recount_lines());
        assert_eq!(stats.total_lines, 3);
        assert_eq!(stats.languages.get("typescript"), Some(&1));
        assert_eq!(stats.languages.get("rust"), Some(&1));
        for path in index.files() {
            assert!(index.metadata(path).is_some());
        }
    }

    #[test]
    fn test_extension_index() {
        let index = index_of(&[("a.TS", "x"), ("b.ts", "y"), ("c.py", "z")]);
        assert_eq!(index.files_with_extension("ts"), &["a.TS", "b.ts"]);
        assert_eq!(index.files_with_extension("PY"), &["c.py"]);
        assert!(index.files_with_extension("go").is_empty());
    }

    #[test]
    fn test_searchable_files_skip_unknown_extensions() {
        let index = index_of(&[("a.ts", "x"), ("logo.png", "bin"), ("notes.md", "y")]);
        let searchable: Vec<_> = index.searchable_files().collect();
        assert_eq!(searchable, vec!["a.ts"]);

        let mixed = index_of(&[("z.rs", "z"), ("lib/b.ts", "b"), ("a.py", "a"), ("c.md", "c")]);
        let searchable: Vec<_> = mixed.searchable_files().collect();
        assert_eq!(searchable, vec!["a.py", "lib/b.ts", "z.rs"]);
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b""), 0);
        assert_eq!(count_lines(b"one"), 1);
        assert_eq!(count_lines(b"one\n"), 1);
        assert_eq!(count_lines(b"one\ntwo"), 2);
        assert_eq!(count_lines(b"\n\n"), 2);
    }

    #[test]
    fn test_hash_is_pure() {
        assert_eq!(hash_bytes(b"same"), hash_bytes(b"same"));
        assert_ne!(hash_bytes(b"same"), hash_bytes(b"diff"));
        assert_eq!(hash_bytes(b"").len(), 64);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("src/App.TSX"), "tsx");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of(".gitignore"), "");
        assert_eq!(extension_of("dir.v2/file"), "");
    }
}
