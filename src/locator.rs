//! Snippet search across an indexed repository
//!
//! Two phases: an exact substring pass, then (only when that finds nothing) a
//! token-similarity pass over files that share most of the snippet's salient
//! identifiers. Only files the index lists as searchable are opened.

use crate::error::SearchError;
use crate::index::RepositoryIndex;
use crate::types::{CodeLocation, MatchKind};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

const MAX_SALIENT_TOKENS: usize = 8;
const MAX_MATCHED_TEXT: usize = 200;

static FUNCTION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:function|fn|def|func)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:const|let|var|class|struct|enum|interface|type|trait|impl|static)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap()
});

static CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

static PROPERTY_ACCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

/// Words too common to say anything about where a snippet came from.
const KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "return", "function", "const", "let", "var", "new", "this",
    "self", "true", "false", "null", "undefined", "class", "import", "export", "from", "async",
    "await", "try", "catch", "throw", "pub", "mut", "impl", "struct", "enum", "match", "def",
    "and", "not", "the", "switch", "case", "break", "continue", "typeof", "void", "static",
];

#[derive(Debug, Clone)]
pub struct LocatorOptions {
    pub max_results: usize,
    /// Minimum Jaccard similarity for a fuzzy hit.
    pub min_score: f64,
    /// Snippets this short (in chars) never go through the fuzzy phase.
    pub fuzzy_min_len: usize,
    /// Max files scored line-by-line in the fuzzy phase.
    pub shortlist_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            max_results: 5,
            min_score: 0.5,
            fuzzy_min_len: 20,
            shortlist_size: 20,
            timeout: Some(Duration::from_secs(2)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnippetLocator {
    options: LocatorOptions,
}

impl SnippetLocator {
    pub fn new(options: LocatorOptions) -> Self {
        Self { options }
    }

    /// Ranked locations of `snippet` in the indexed files under `root`, best first.
    pub fn locate(
        &self,
        snippet: &str,
        index: &RepositoryIndex,
        root: &Path,
    ) -> Result<Vec<CodeLocation>, SearchError> {
        let needle = snippet.trim();
        if needle.is_empty() || self.options.max_results == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let deadline = Deadline {
            start,
            at: self.options.timeout.map(|t| start + t),
        };

        let mut loaded: Vec<(&str, String)> = Vec::new();
        let mut hits = Vec::new();

        for path in index.searchable_files() {
            deadline.check()?;
            let Some(content) = read_text(root, path) else {
                continue;
            };

            if hits.len() < self.options.max_results {
                for (offset, _) in content.match_indices(needle) {
                    hits.push(CodeLocation {
                        file: path.to_string(),
                        line: line_at(&content, offset),
                        confidence: 1.0,
                        matched_text: truncate(needle),
                        match_kind: MatchKind::Literal,
                    });
                    if hits.len() >= self.options.max_results {
                        break;
                    }
                }
            }
            loaded.push((path, content));
        }

        if !hits.is_empty() {
            tracing::debug!("Literal snippet search found {} hit(s)", hits.len());
            return Ok(hits);
        }

        if needle.chars().count() <= self.options.fuzzy_min_len {
            return Ok(Vec::new());
        }

        let results = self.fuzzy_search(needle, &loaded, &deadline)?;
        tracing::debug!(
            "Fuzzy snippet search over {} files found {} hit(s) in {}ms",
            loaded.len(),
            results.len(),
            start.elapsed().as_millis()
        );
        Ok(results)
    }

    fn fuzzy_search(
        &self,
        needle: &str,
        files: &[(&str, String)],
        deadline: &Deadline,
    ) -> Result<Vec<CodeLocation>, SearchError> {
        let mut tokens = salient_tokens(needle);
        if tokens.is_empty() {
            tokens = identifier_tokens(needle)
                .into_iter()
                .filter(|t| t.len() >= 3 && !KEYWORDS.contains(&t.as_str()))
                .take(MAX_SALIENT_TOKENS)
                .collect();
        }
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        // Tokens come from untrusted input; escape before they become patterns.
        let matchers: Vec<Regex> = tokens
            .iter()
            .filter_map(|t| Regex::new(&format!(r"\b{}\b", regex::escape(t))).ok())
            .collect();
        let required = matchers.len().div_ceil(2);

        let mut shortlist: Vec<(usize, &str, &str)> = Vec::new();
        for (path, content) in files {
            deadline.check()?;
            let found = matchers.iter().filter(|m| m.is_match(content)).count();
            if found >= required.max(1) {
                shortlist.push((found, path, content.as_str()));
            }
        }
        shortlist.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        shortlist.truncate(self.options.shortlist_size);

        let target: HashSet<String> = identifier_tokens(needle).into_iter().collect();
        let window = needle.lines().filter(|l| !l.trim().is_empty()).count().max(1);

        let mut scored = Vec::new();
        for (_, path, content) in shortlist {
            deadline.check()?;
            let lines: Vec<&str> = content.lines().collect();
            for i in 0..lines.len() {
                if lines[i].trim().is_empty() {
                    continue;
                }
                let end = (i + window).min(lines.len());
                let candidate: HashSet<String> = lines[i..end]
                    .iter()
                    .flat_map(|l| identifier_tokens(l))
                    .collect();
                let score = jaccard(&target, &candidate);
                if score >= self.options.min_score {
                    scored.push(CodeLocation {
                        file: path.to_string(),
                        line: (i + 1) as u32,
                        confidence: score,
                        matched_text: truncate(lines[i].trim()),
                        match_kind: MatchKind::Fuzzy,
                    });
                }
            }
        }

        rank(&mut scored);
        scored.truncate(self.options.max_results);
        Ok(scored)
    }
}

struct Deadline {
    start: Instant,
    at: Option<Instant>,
}

impl Deadline {
    fn check(&self) -> Result<(), SearchError> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(SearchError::Timeout {
                elapsed_ms: self.start.elapsed().as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }
}

/// Best first; ties broken by file then line so output is stable.
pub fn rank(locations: &mut [CodeLocation]) {
    locations.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });
}

/// Function/method names, declared identifiers and accessed properties, in
/// order of first appearance.
pub fn salient_tokens(snippet: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    for pattern in [&*FUNCTION_DECL, &*DECLARATION, &*CALL, &*PROPERTY_ACCESS] {
        for captures in pattern.captures_iter(snippet) {
            let Some(m) = captures.get(1) else { continue };
            let token = m.as_str();
            if token.len() < 3 || KEYWORDS.contains(&token) {
                continue;
            }
            if seen.insert(token.to_string()) {
                tokens.push(token.to_string());
            }
        }
    }

    tokens.truncate(MAX_SALIENT_TOKENS);
    tokens
}

fn identifier_tokens(text: &str) -> Vec<String> {
    IDENTIFIER
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

fn read_text(root: &Path, relative: &str) -> Option<String> {
    let bytes = fs::read(root.join(relative)).ok()?;
    String::from_utf8(bytes).ok()
}

/// 1-based line containing byte `offset`.
fn line_at(content: &str, offset: usize) -> u32 {
    (content[..offset].bytes().filter(|&b| b == b'\n').count() + 1) as u32
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_MATCHED_TEXT {
        return text.to_string();
    }
    let mut end = MAX_MATCHED_TEXT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexBuilder, IndexOptions};
    use tempfile::TempDir;

    fn repo(files: &[(&str, &str)]) -> (TempDir, RepositoryIndex) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        let index = IndexBuilder::new(IndexOptions::default())
            .build(dir.path(), "local")
            .unwrap();
        (dir, index)
    }

    #[test]
    fn test_literal_hit_has_full_confidence() {
        let (dir, index) = repo(&[
            ("a.ts", "function foo(){}\n"),
            ("b.ts", "// header\nfunction bar(){}\n"),
        ]);

        let hits = SnippetLocator::default()
            .locate("function bar(){}", &index, dir.path())
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "b.ts");
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[0].confidence, 1.0);
        assert_eq!(hits[0].match_kind, MatchKind::Literal);
    }

    #[test]
    fn test_absent_snippet_returns_empty() {
        let (dir, index) = repo(&[("a.ts", "function foo(){}\n")]);
        let hits = SnippetLocator::default()
            .locate("definitelyNotInThisRepository()", &index, dir.path())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_results_are_bounded() {
        let content = "log();\n".repeat(20);
        let (dir, index) = repo(&[("a.ts", content.as_str())]);
        let locator = SnippetLocator::new(LocatorOptions {
            max_results: 3,
            ..Default::default()
        });

        let hits = locator.locate("log();", &index, dir.path()).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].line, 1);
    }

    #[test]
    fn test_fuzzy_match_tolerates_reformatting() {
        let (dir, index) = repo(&[
            (
                "src/user.ts",
                "export class UserService {\n  async loadUser(id: string) {\n    return this.repository.findById(id);\n  }\n}\n",
            ),
            ("src/other.ts", "export const unrelated = 42;\n"),
        ]);

        let snippet = "return this.repository.findById( id )";
        let hits = SnippetLocator::default()
            .locate(snippet, &index, dir.path())
            .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].file, "src/user.ts");
        assert_eq!(hits[0].line, 3);
        assert_eq!(hits[0].match_kind, MatchKind::Fuzzy);
        assert!(hits[0].confidence >= 0.5 && hits[0].confidence <= 1.0);
    }

    #[test]
    fn test_short_snippets_skip_fuzzy_phase() {
        let (dir, index) = repo(&[("a.ts", "const total = sum(values);\n")]);
        let hits = SnippetLocator::default()
            .locate("sum( values )", &index, dir.path())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_metacharacters_are_literal() {
        let (dir, index) = repo(&[("a.ts", "const re = /a.*b(c)?$/;\nmatch(re)\n")]);
        let hits = SnippetLocator::default()
            .locate("/a.*b(c)?$/", &index, dir.path())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 1);

        // Fuzzy tokens built from hostile input must not blow up pattern compilation.
        let hits = SnippetLocator::default()
            .locate("foo.bar(baz[)] + (.*)+ qux.quux()", &index, dir.path())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_non_searchable_files_are_ignored() {
        let (dir, index) = repo(&[("notes.md", "function foo(){}\n")]);
        let hits = SnippetLocator::default()
            .locate("function foo(){}", &index, dir.path())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_zero_timeout_reports_timeout() {
        let (dir, index) = repo(&[("a.ts", "function foo(){}\n")]);
        let locator = SnippetLocator::new(LocatorOptions {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        });
        let result = locator.locate("function foo(){}", &index, dir.path());
        assert!(matches!(result, Err(SearchError::Timeout { .. })));
    }

    #[test]
    fn test_salient_tokens() {
        let tokens = salient_tokens("function loadUser(id) { return api.fetchUser(id).data; }");
        assert_eq!(tokens, vec!["loadUser", "fetchUser", "data"]);
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&a, &a), 1.0);
    }
}
