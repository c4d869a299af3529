//! Heuristics for spotting fabricated or boilerplate issue claims

use crate::types::IssueCategory;
use regex::Regex;
use std::sync::LazyLock;

/// Snippets that stand in for code rather than quote it.
static PLACEHOLDER_SNIPPETS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^\s*(\.\.\.|…)\s*$").unwrap(),
        Regex::new(r"(//|#|/\*)\s*(\.\.\.|…)").unwrap(),
        Regex::new(r"(?i)\b(existing|rest of(\s+the)?|your|some|more|other)\s+code\b").unwrap(),
        Regex::new(r"(?i)\byour[_\s]?(implementation|logic|function|code)\b").unwrap(),
        Regex::new(r"(?i)\b(todo|fixme)\s*:?\s*implement\b").unwrap(),
        Regex::new(r"(?i)^\s*(//|#|/\*|<!--)?\s*placeholder\b").unwrap(),
        Regex::new(r"(?i)\blorem\s+ipsum\b").unwrap(),
        Regex::new(r"(?i)^\s*(code\s+here|snippet|n/?a|none)\s*$").unwrap(),
        Regex::new(r"(?i)^\s*(https?://)?(www\.)?example\.com\S*\s*$").unwrap(),
    ]
});

/// Paths that look made up: template paths and stand-in file names.
static GENERIC_FILE_NAMES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)(^|/)path/to/").unwrap(),
        Regex::new(
            r"(?i)(^|/)(example|sample|file|filename|your[-_]?file|my[-_]?file|some[-_]?file|placeholder|unknown)\.[a-z0-9]+$",
        )
        .unwrap(),
        Regex::new(r"<[^>/]+>").unwrap(),
        Regex::new(r"(?i)(^|/)x{3,}(/|\.|$)").unwrap(),
    ]
});

/// Findings that read the same for every repository.
static GENERIC_DESCRIPTIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)consider adding (more |proper |better )?(error handling|comments|documentation|tests|logging|type annotations)").unwrap(),
        Regex::new(r"(?i)(add|improve|increase) (unit |integration )?test coverage").unwrap(),
        Regex::new(r"(?i)follow(ing)? (the )?(industry |coding )?best practices").unwrap(),
        Regex::new(r"(?i)improve (the )?(overall )?(code )?(readability|maintainability|quality)").unwrap(),
        Regex::new(r"(?i)(code|this) could be (refactored|improved|optimized|cleaner)").unwrap(),
        Regex::new(r"(?i)consider using (typescript|environment variables|a linter)").unwrap(),
    ]
});

const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "adoc", "png", "jpg", "jpeg", "gif", "svg"];

const MANIFEST_EXTENSIONS: &[&str] = &[
    "json", "toml", "lock", "txt", "xml", "gradle", "kts", "mod", "sum", "yaml", "yml", "cfg", "ini",
];

pub fn is_placeholder_snippet(snippet: &str) -> bool {
    PLACEHOLDER_SNIPPETS.iter().any(|re| re.is_match(snippet))
}

pub fn is_generic_file_name(path: &str) -> bool {
    GENERIC_FILE_NAMES.iter().any(|re| re.is_match(path))
}

pub fn is_generic_description(text: &str) -> bool {
    !text.trim().is_empty() && GENERIC_DESCRIPTIONS.iter().any(|re| re.is_match(text))
}

/// Whether an issue of `category` is implausible in a file with `extension`.
pub fn category_mismatch(category: IssueCategory, extension: &str) -> bool {
    match category {
        IssueCategory::Dependencies => {
            !extension.is_empty() && !MANIFEST_EXTENSIONS.contains(&extension)
        }
        IssueCategory::Security
        | IssueCategory::Performance
        | IssueCategory::Architecture
        | IssueCategory::CodeQuality => DOC_EXTENSIONS.contains(&extension),
        IssueCategory::Testing | IssueCategory::Documentation | IssueCategory::Style => false,
    }
}
