use crate::error::ClaimError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// ISSUE CLAIMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Security,
    Performance,
    CodeQuality,
    Architecture,
    Dependencies,
    Testing,
    Documentation,
    Style,
}

impl IssueCategory {
    pub fn parse(raw: &str) -> Result<Self, ClaimError> {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            "code_quality" | "quality" | "maintainability" => Ok(Self::CodeQuality),
            "architecture" | "design" => Ok(Self::Architecture),
            "dependencies" | "dependency" => Ok(Self::Dependencies),
            "testing" | "tests" | "test" => Ok(Self::Testing),
            "documentation" | "docs" => Ok(Self::Documentation),
            "style" | "formatting" => Ok(Self::Style),
            _ => Err(ClaimError::UnknownCategory(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl IssueSeverity {
    pub fn parse(raw: &str) -> Result<Self, ClaimError> {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "blocker" => Ok(Self::Critical),
            "high" | "error" | "major" => Ok(Self::High),
            "medium" | "warning" | "moderate" => Ok(Self::Medium),
            "low" | "info" | "minor" => Ok(Self::Low),
            _ => Err(ClaimError::UnknownSeverity(raw.to_string())),
        }
    }
}

/// Line numbers sometimes arrive as strings from model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLine {
    Number(i64),
    Text(String),
}

/// Issue claim exactly as supplied by the analysis client. Every field is optional
/// here; [`IssueLocationClaim::try_from`] decides what is acceptable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIssueClaim {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "path", alias = "filePath", alias = "file_path")]
    pub file: Option<String>,
    #[serde(default, alias = "lineNumber", alias = "line_number")]
    pub line: Option<RawLine>,
    #[serde(default, alias = "codeSnippet", alias = "code_snippet")]
    pub snippet: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "message")]
    pub description: Option<String>,
}

/// A parsed, untrusted assertion that an issue lives at `file:line`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueLocationClaim {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_confidence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<IssueCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<IssueSeverity>,
    pub title: String,
    pub description: String,
}

impl IssueLocationClaim {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            id: None,
            file: file.into(),
            line,
            snippet: None,
            declared_confidence: None,
            category: None,
            severity: None,
            title: String::new(),
            description: String::new(),
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_category(mut self, category: IssueCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Snippet with surrounding whitespace removed, `None` when blank.
    pub fn trimmed_snippet(&self) -> Option<&str> {
        self.snippet
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl TryFrom<RawIssueClaim> for IssueLocationClaim {
    type Error = ClaimError;

    fn try_from(raw: RawIssueClaim) -> Result<Self, Self::Error> {
        let file = raw.file.ok_or(ClaimError::MissingField("file"))?;
        let file = normalize_claim_path(&file);
        if file.is_empty() {
            return Err(ClaimError::EmptyFile);
        }

        let line = match raw.line.ok_or(ClaimError::MissingField("line"))? {
            RawLine::Number(n) => n,
            RawLine::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| ClaimError::MalformedLine(text.clone()))?,
        };
        if line < 1 || line > u32::MAX as i64 {
            return Err(ClaimError::InvalidLine(line));
        }

        let declared_confidence = match raw.confidence {
            Some(c) if !(0.0..=100.0).contains(&c) => {
                return Err(ClaimError::InvalidConfidence(c));
            }
            Some(c) => Some(c.round() as u8),
            None => None,
        };

        let category = raw.category.as_deref().map(IssueCategory::parse).transpose()?;
        let severity = raw.severity.as_deref().map(IssueSeverity::parse).transpose()?;

        Ok(Self {
            id: raw.id,
            file,
            line: line as u32,
            snippet: raw.snippet,
            declared_confidence,
            category,
            severity,
            title: raw.title.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
        })
    }
}

/// Strips `./`, leading slashes and backslashes so claims line up with index paths.
pub fn normalize_claim_path(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let mut path = unified.as_str();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }
    path.to_string()
}

// ============================================================================
// LOCATIONS & VALIDATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Literal,
    Fuzzy,
    Claimed,
}

/// A place in the repository where a snippet was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: u32,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub matched_text: String,
    pub match_kind: MatchKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    MalformedClaim,
    FileNotFound,
    Recovered,
    RecoveryFailed,
    GenericFileName,
    LineOutOfRange,
    PlaceholderSnippet,
    GenericDescription,
    SnippetNotFound,
    LineAdjusted,
    CategoryMismatch,
    SearchTimeout,
}

impl ReasonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedClaim => "malformed_claim",
            Self::FileNotFound => "file_not_found",
            Self::Recovered => "recovered",
            Self::RecoveryFailed => "recovery_failed",
            Self::GenericFileName => "generic_file_name",
            Self::LineOutOfRange => "line_out_of_range",
            Self::PlaceholderSnippet => "placeholder_snippet",
            Self::GenericDescription => "generic_description",
            Self::SnippetNotFound => "snippet_not_found",
            Self::LineAdjusted => "line_adjusted",
            Self::CategoryMismatch => "category_mismatch",
            Self::SearchTimeout => "search_timeout",
        }
    }
}

impl fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReason {
    pub kind: ReasonKind,
    pub message: String,
}

impl ValidationReason {
    pub fn new(kind: ReasonKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    pub is_valid: bool,
    /// 0 - 100
    pub confidence: u8,
    pub reasons: Vec<ValidationReason>,
    pub recovered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_location: Option<CodeLocation>,
}

impl ValidationResult {
    pub fn has_reason(&self, kind: ReasonKind) -> bool {
        self.reasons.iter().any(|r| r.kind == kind)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total: usize,
    pub valid: usize,
    pub filtered: usize,
    pub recovered: usize,
    pub average_confidence: f64,
    pub reason_counts: BTreeMap<String, usize>,
}

impl ValidationStats {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let total = results.len();
        let valid = results.iter().filter(|r| r.is_valid).count();
        let recovered = results.iter().filter(|r| r.recovered).count();
        let average_confidence = if total == 0 {
            0.0
        } else {
            results.iter().map(|r| r.confidence as f64).sum::<f64>() / total as f64
        };

        let mut reason_counts = BTreeMap::new();
        for reason in results.iter().flat_map(|r| r.reasons.iter()) {
            *reason_counts.entry(reason.kind.to_string()).or_insert(0) += 1;
        }

        Self {
            total,
            valid,
            filtered: total - valid,
            recovered,
            average_confidence,
            reason_counts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub id: String,
    pub results: Vec<ValidationResult>,
    pub stats: ValidationStats,
}

/// Issues from two revisions sorted by what happened to them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueBuckets {
    pub new: Vec<IssueLocationClaim>,
    pub fixed: Vec<IssueLocationClaim>,
    pub unchanged: Vec<IssueLocationClaim>,
    pub modified: Vec<IssueLocationClaim>,
}

// ----------------------------------------------------------------------------
// API Requests / Responses
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepoSource {
    Local {
        path: String,
        #[serde(default)]
        repo_url: Option<String>,
        #[serde(default)]
        branch: Option<String>,
    },
    Remote {
        url: String,
        #[serde(default)]
        branch: Option<String>,
    },
}

impl RepoSource {
    pub fn branch(&self) -> Option<&str> {
        match self {
            RepoSource::Local { branch, .. } | RepoSource::Remote { branch, .. } => {
                branch.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub source: RepoSource,
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub repo_url: String,
    pub branch: Option<String>,
    pub commit_hash: String,
    pub total_files: usize,
    pub total_lines: usize,
    pub total_bytes: u64,
    pub languages: BTreeMap<String, usize>,
    pub skipped_files: usize,
    pub partial: bool,
    pub build_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub source: RepoSource,
    pub claims: Vec<RawIssueClaim>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareRequest {
    pub base: RepoSource,
    pub head: RepoSource,
    #[serde(default)]
    pub base_issues: Vec<RawIssueClaim>,
    #[serde(default)]
    pub head_issues: Vec<RawIssueClaim>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub moved: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResponse {
    pub base: IndexSummary,
    pub head: IndexSummary,
    pub diff: DiffSummary,
    pub validation: ValidationReport,
    pub buckets: IssueBuckets,
}
