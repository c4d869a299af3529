//! Scores issue location claims against a repository index and repairs the
//! ones that point at the wrong place.

pub mod patterns;

use crate::index::{extension_of, RepositoryIndex};
use crate::locator::SnippetLocator;
use crate::types::{
    CodeLocation, IssueLocationClaim, MatchKind, RawIssueClaim, ReasonKind, ValidationReason,
    ValidationReport, ValidationResult, ValidationStats,
};
use rayon::prelude::*;
use std::fs;
use std::path::Path;

const FILE_NOT_FOUND_PENALTY: i32 = 40;
const GENERIC_FILE_NAME_PENALTY: i32 = 20;
const LINE_OUT_OF_RANGE_PENALTY: i32 = 20;
const PLACEHOLDER_SNIPPET_PENALTY: i32 = 30;
const GENERIC_DESCRIPTION_PENALTY: i32 = 15;
const SNIPPET_NOT_FOUND_PENALTY: i32 = 35;
const CATEGORY_MISMATCH_PENALTY: i32 = 10;
/// Full bonus for a literal recovery; fuzzy recoveries earn it in proportion
/// to their similarity.
const RECOVERY_BONUS: f64 = 30.0;

pub const VALIDITY_THRESHOLD: u8 = 50;

/// Running confidence for one claim.
struct Scorecard {
    confidence: i32,
    reasons: Vec<ValidationReason>,
}

impl Scorecard {
    fn new() -> Self {
        Self {
            confidence: 100,
            reasons: Vec::new(),
        }
    }

    fn deduct(&mut self, points: i32, kind: ReasonKind, message: String) {
        self.confidence -= points;
        self.reasons.push(ValidationReason::new(kind, message));
    }

    fn credit(&mut self, points: i32, kind: ReasonKind, message: String) {
        self.confidence += points;
        self.reasons.push(ValidationReason::new(kind, message));
    }

    fn note(&mut self, kind: ReasonKind, message: String) {
        self.reasons.push(ValidationReason::new(kind, message));
    }

    fn confidence(&self) -> u8 {
        self.confidence.clamp(0, 100) as u8
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocationValidator {
    locator: SnippetLocator,
}

impl LocationValidator {
    pub fn new(locator: SnippetLocator) -> Self {
        Self { locator }
    }

    /// Score one claim. Only the recovery search touches the filesystem.
    pub fn validate(
        &self,
        claim: &IssueLocationClaim,
        index: &RepositoryIndex,
        root: &Path,
    ) -> ValidationResult {
        let mut card = Scorecard::new();
        let snippet = claim.trimmed_snippet();
        let placeholder = snippet.is_some_and(patterns::is_placeholder_snippet);
        let usable_snippet = snippet.filter(|_| !placeholder);

        let file_exists = index.contains(&claim.file);
        let mut corrected: Option<CodeLocation> = None;
        let mut recovered = false;

        if !file_exists {
            card.deduct(
                FILE_NOT_FOUND_PENALTY,
                ReasonKind::FileNotFound,
                format!("{} is not in the repository index", claim.file),
            );
            if let Some(s) = usable_snippet {
                corrected = self.recover(s, &claim.file, index, root, &mut card);
                recovered = corrected.is_some();
            }
        }

        if patterns::is_generic_file_name(&claim.file) {
            card.deduct(
                GENERIC_FILE_NAME_PENALTY,
                ReasonKind::GenericFileName,
                format!("{} looks like a placeholder path", claim.file),
            );
        }

        if let Some(meta) = index.metadata(&claim.file) {
            if claim.line as usize > meta.line_count {
                card.deduct(
                    LINE_OUT_OF_RANGE_PENALTY,
                    ReasonKind::LineOutOfRange,
                    format!(
                        "line {} is past the end of {} ({} lines)",
                        claim.line, claim.file, meta.line_count
                    ),
                );
            }
        }

        if placeholder {
            card.deduct(
                PLACEHOLDER_SNIPPET_PENALTY,
                ReasonKind::PlaceholderSnippet,
                "snippet is placeholder text, not code from the repository".to_string(),
            );
        }

        if patterns::is_generic_description(&claim.title)
            || patterns::is_generic_description(&claim.description)
        {
            card.deduct(
                GENERIC_DESCRIPTION_PENALTY,
                ReasonKind::GenericDescription,
                "description is generic boilerplate".to_string(),
            );
        }

        if let (true, Some(s)) = (file_exists, usable_snippet) {
            match find_in_file(root, &claim.file, s, claim.line) {
                Some(line) if line == claim.line => {}
                Some(line) => {
                    card.note(
                        ReasonKind::LineAdjusted,
                        format!("snippet found at line {} instead of {}", line, claim.line),
                    );
                    corrected = Some(CodeLocation {
                        file: claim.file.clone(),
                        line,
                        confidence: 1.0,
                        matched_text: s.lines().next().unwrap_or(s).trim().to_string(),
                        match_kind: MatchKind::Claimed,
                    });
                }
                None => {
                    card.deduct(
                        SNIPPET_NOT_FOUND_PENALTY,
                        ReasonKind::SnippetNotFound,
                        format!("snippet does not appear in {}", claim.file),
                    );
                    corrected = self.recover(s, &claim.file, index, root, &mut card);
                    recovered = corrected.is_some();
                }
            }
        }

        let effective_file = corrected
            .as_ref()
            .map(|loc| loc.file.as_str())
            .unwrap_or(claim.file.as_str());
        if let Some(category) = claim.category {
            let extension = extension_of(effective_file);
            if patterns::category_mismatch(category, &extension) {
                card.deduct(
                    CATEGORY_MISMATCH_PENALTY,
                    ReasonKind::CategoryMismatch,
                    format!("{:?} issue is unlikely in a .{} file", category, extension),
                );
            }
        }

        let resolved = file_exists || recovered;
        let confidence = card.confidence();

        ValidationResult {
            claim_id: claim.id.clone(),
            is_valid: resolved && confidence >= VALIDITY_THRESHOLD,
            confidence,
            reasons: card.reasons,
            recovered,
            corrected_location: corrected,
        }
    }

    /// Parse and score an untrusted claim. Parse failures become invalid results.
    pub fn validate_raw(
        &self,
        raw: &RawIssueClaim,
        index: &RepositoryIndex,
        root: &Path,
    ) -> ValidationResult {
        match IssueLocationClaim::try_from(raw.clone()) {
            Ok(claim) => self.validate(&claim, index, root),
            Err(e) => ValidationResult {
                claim_id: raw.id.clone(),
                is_valid: false,
                confidence: 0,
                reasons: vec![ValidationReason::new(
                    ReasonKind::MalformedClaim,
                    format!("malformed claim: {}", e),
                )],
                recovered: false,
                corrected_location: None,
            },
        }
    }

    /// Validate every claim independently; results keep the input order.
    pub fn validate_all(
        &self,
        claims: &[RawIssueClaim],
        index: &RepositoryIndex,
        root: &Path,
    ) -> ValidationReport {
        self.validate_each(claims, |_| (index, root))
    }

    /// Like [`validate_all`](Self::validate_all), but `target` picks the
    /// snapshot (index and checkout root) each claim is checked against.
    pub fn validate_each<'a, F>(&self, claims: &[RawIssueClaim], target: F) -> ValidationReport
    where
        F: Fn(&RawIssueClaim) -> (&'a RepositoryIndex, &'a Path) + Sync,
    {
        let results: Vec<ValidationResult> = claims
            .par_iter()
            .map(|raw| {
                let (index, root) = target(raw);
                self.validate_raw(raw, index, root)
            })
            .collect();

        let stats = ValidationStats::from_results(&results);
        tracing::info!(
            "Validated {} claims: {} valid, {} filtered, {} recovered (avg confidence {:.1})",
            stats.total,
            stats.valid,
            stats.filtered,
            stats.recovered,
            stats.average_confidence
        );

        ValidationReport {
            id: uuid::Uuid::new_v4().to_string(),
            results,
            stats,
        }
    }

    fn recover(
        &self,
        snippet: &str,
        claimed_file: &str,
        index: &RepositoryIndex,
        root: &Path,
        card: &mut Scorecard,
    ) -> Option<CodeLocation> {
        match self.locator.locate(snippet, index, root) {
            Ok(hits) => match pick_best(hits, claimed_file) {
                Some(best) => {
                    let bonus = (RECOVERY_BONUS * best.confidence).round() as i32;
                    card.credit(
                        bonus,
                        ReasonKind::Recovered,
                        format!(
                            "recovered to {}:{} ({:?} match, {:.2})",
                            best.file, best.line, best.match_kind, best.confidence
                        ),
                    );
                    Some(best)
                }
                None => {
                    card.note(
                        ReasonKind::RecoveryFailed,
                        "snippet not found in any indexed file".to_string(),
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Recovery for {} abandoned: {}", claimed_file, e);
                card.note(ReasonKind::SearchTimeout, e.to_string());
                None
            }
        }
    }
}

/// Highest-confidence hit; among equals, one sharing the claimed file name wins.
fn pick_best(hits: Vec<CodeLocation>, claimed_file: &str) -> Option<CodeLocation> {
    let top = hits.first()?.confidence;
    let claimed_name = file_name(claimed_file);
    let preferred = hits
        .iter()
        .take_while(|h| h.confidence >= top)
        .position(|h| file_name(&h.file) == claimed_name);
    let index = preferred.unwrap_or(0);
    hits.into_iter().nth(index)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Line of the occurrence of `snippet` in `relative` closest to `near`,
/// tolerating indentation differences.
fn find_in_file(root: &Path, relative: &str, snippet: &str, near: u32) -> Option<u32> {
    let content = fs::read_to_string(root.join(relative)).ok()?;

    let mut lines: Vec<u32> = content
        .match_indices(snippet)
        .map(|(offset, _)| (content[..offset].matches('\n').count() + 1) as u32)
        .collect();

    if lines.is_empty() {
        lines = find_normalized(&content, snippet);
    }

    lines.into_iter().min_by_key(|line| line.abs_diff(near))
}

fn find_normalized(content: &str, snippet: &str) -> Vec<u32> {
    let wanted: Vec<String> = snippet
        .lines()
        .map(collapse_whitespace)
        .filter(|l| !l.is_empty())
        .collect();
    if wanted.is_empty() {
        return Vec::new();
    }

    let haystack: Vec<(usize, String)> = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i, collapse_whitespace(l)))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    haystack
        .windows(wanted.len())
        .filter(|window| window.iter().zip(&wanted).all(|((_, have), want)| have == want))
        .map(|window| (window[0].0 + 1) as u32)
        .collect()
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexBuilder, IndexOptions};
    use crate::locator::LocatorOptions;
    use crate::types::{IssueCategory, RawLine};
    use std::time::Duration;
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

    fn scenario_repo() -> (TempDir, RepositoryIndex) {
        repo(&[("a.ts", "function foo(){}\n"), ("b.ts", "function bar(){}\n")])
    }

    #[test]
    fn test_recovers_wrong_file_from_snippet() {
        let (dir, index) = scenario_repo();
        let claim = IssueLocationClaim::new("c.ts", 1).with_snippet("function foo(){}");

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert!(result.recovered);
        assert!(result.is_valid);
        assert!(result.has_reason(ReasonKind::FileNotFound));
        assert!(result.has_reason(ReasonKind::Recovered));
        let corrected = result.corrected_location.unwrap();
        assert_eq!(corrected.file, "a.ts");
        assert_eq!(corrected.line, 1);
    }

    #[test]
    fn test_missing_file_without_snippet_is_invalid() {
        let (dir, index) = scenario_repo();
        let claim = IssueLocationClaim::new("missing.ts", 3);

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert!(!result.is_valid);
        assert!(result.confidence <= 60);
        assert!(!result.recovered);
        assert!(result.corrected_location.is_none());
    }

    #[test]
    fn test_missing_file_with_unfindable_snippet() {
        let (dir, index) = scenario_repo();
        let claim =
            IssueLocationClaim::new("c.ts", 1).with_snippet("function nowhere(){ return 1; }");

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert!(!result.is_valid);
        assert!(!result.recovered);
        assert!(result.has_reason(ReasonKind::RecoveryFailed));
    }

    #[test]
    fn test_correct_claim_keeps_full_confidence() {
        let (dir, index) = scenario_repo();
        let claim = IssueLocationClaim::new("b.ts", 1)
            .with_snippet("function bar(){}")
            .with_category(IssueCategory::CodeQuality)
            .with_title("Empty function body");

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert!(result.is_valid);
        assert_eq!(result.confidence, 100);
        assert!(result.reasons.is_empty());
        assert!(!result.recovered);
    }

    #[test]
    fn test_line_out_of_range() {
        let (dir, index) = scenario_repo();
        let claim = IssueLocationClaim::new("a.ts", 40);

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert_eq!(result.confidence, 80);
        assert!(result.is_valid);
        assert!(result.has_reason(ReasonKind::LineOutOfRange));
    }

    #[test]
    fn test_snippet_in_other_line_adjusts_location() {
        let (dir, index) = repo(&[(
            "src/app.ts",
            "import x from 'x';\n\nexport function run() {\n    return x.start();\n}\n",
        )]);
        let claim = IssueLocationClaim::new("src/app.ts", 1).with_snippet("return x.start();");

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert!(result.is_valid);
        assert!(!result.recovered);
        assert!(result.has_reason(ReasonKind::LineAdjusted));
        assert_eq!(result.corrected_location.unwrap().line, 4);
    }

    #[test]
    fn test_snippet_missing_from_existing_file_recovers_elsewhere() {
        let (dir, index) = repo(&[
            ("src/a.ts", "export const a = 1;\n"),
            ("src/b.ts", "export const b = 2;\nexport function compute(){ return b * 2; }\n"),
        ]);
        let claim = IssueLocationClaim::new("src/a.ts", 1)
            .with_snippet("export function compute(){ return b * 2; }");

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert!(result.recovered);
        assert!(result.has_reason(ReasonKind::SnippetNotFound));
        assert_eq!(result.confidence, 95);
        let corrected = result.corrected_location.unwrap();
        assert_eq!(corrected.file, "src/b.ts");
        assert_eq!(corrected.line, 2);
    }

    #[test]
    fn test_placeholder_and_generic_claims_are_filtered() {
        let (dir, index) = scenario_repo();
        let claim = IssueLocationClaim::new("path/to/file.ts", 1)
            .with_snippet("// ... existing code")
            .with_description("Consider adding error handling");

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert!(!result.is_valid);
        assert!(!result.recovered);
        assert!(result.has_reason(ReasonKind::PlaceholderSnippet));
        assert!(result.has_reason(ReasonKind::GenericFileName));
        assert!(result.has_reason(ReasonKind::GenericDescription));
        // 100 - 40 - 20 - 30 - 15
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn test_markup_placeholder_attribute_is_real_code() {
        let (dir, index) = repo(&[(
            "src/Login.tsx",
            "export const Login = () => (\n  <input placeholder=\"Email\" />\n);\n",
        )]);
        let validator = LocationValidator::default();

        let correct = IssueLocationClaim::new("src/Login.tsx", 2)
            .with_snippet(r#"<input placeholder="Email" />"#);
        let result = validator.validate(&correct, &index, dir.path());
        assert_eq!(result.confidence, 100);
        assert!(!result.has_reason(ReasonKind::PlaceholderSnippet));

        let misplaced = IssueLocationClaim::new("src/Signup.tsx", 2)
            .with_snippet(r#"<input placeholder="Email" />"#);
        let result = validator.validate(&misplaced, &index, dir.path());
        assert!(result.recovered);
        assert!(result.is_valid);
        assert_eq!(result.confidence, 90);
        let corrected = result.corrected_location.unwrap();
        assert_eq!(corrected.file, "src/Login.tsx");
        assert_eq!(corrected.line, 2);
    }

    #[test]
    fn test_category_mismatch() {
        let (dir, index) = repo(&[("README.md", "# Title\n"), ("src/a.ts", "x\n")]);
        let claim = IssueLocationClaim::new("README.md", 1).with_category(IssueCategory::Security);

        let result = LocationValidator::default().validate(&claim, &index, dir.path());

        assert_eq!(result.confidence, 90);
        assert!(result.has_reason(ReasonKind::CategoryMismatch));
    }

    #[test]
    fn test_search_timeout_keeps_prior_confidence() {
        let (dir, index) = scenario_repo();
        let validator = LocationValidator::new(SnippetLocator::new(LocatorOptions {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        }));
        let claim = IssueLocationClaim::new("c.ts", 1).with_snippet("function foo(){}");

        let result = validator.validate(&claim, &index, dir.path());

        assert!(!result.recovered);
        assert!(!result.is_valid);
        assert_eq!(result.confidence, 60);
        assert!(result.has_reason(ReasonKind::SearchTimeout));
    }

    #[test]
    fn test_validate_all_preserves_order_and_counts() {
        let (dir, index) = scenario_repo();
        let claims = vec![
            RawIssueClaim {
                id: Some("first".to_string()),
                file: Some("a.ts".to_string()),
                line: Some(RawLine::Number(1)),
                ..Default::default()
            },
            RawIssueClaim {
                id: Some("second".to_string()),
                file: Some("a.ts".to_string()),
                line: Some(RawLine::Number(0)),
                ..Default::default()
            },
            RawIssueClaim {
                id: Some("third".to_string()),
                file: Some("c.ts".to_string()),
                line: Some(RawLine::Number(1)),
                snippet: Some("function bar(){}".to_string()),
                ..Default::default()
            },
        ];

        let report = LocationValidator::default().validate_all(&claims, &index, dir.path());

        let ids: Vec<_> = report
            .results
            .iter()
            .map(|r| r.claim_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert!(report.results[1].has_reason(ReasonKind::MalformedClaim));
        assert_eq!(report.results[1].confidence, 0);
        assert_eq!(report.stats.total, 3);
        assert_eq!(report.stats.valid, 2);
        assert_eq!(report.stats.filtered, 1);
        assert_eq!(report.stats.recovered, 1);
        assert_eq!(report.stats.reason_counts.get("malformed_claim"), Some(&1));
    }

    #[test]
    fn test_find_normalized_ignores_indentation() {
        let content = "fn main() {\n        let x = compute( 1 );\n}\n";
        assert_eq!(find_normalized(content, "let x = compute( 1 );"), vec![2]);
        assert_eq!(find_normalized(content, "  fn main() {\n  let x = compute( 1 );"), vec![1]);
    }
}
