//! Content-addressed diffing of two repository indices
//!
//! Files are compared by content hash rather than by path alone, which lets a
//! rename without edits show up as a move instead of an add/remove pair.

use crate::index::RepositoryIndex;
use crate::types::{DiffSummary, IssueBuckets, IssueCategory, IssueLocationClaim};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Revision {
    Main,
    Candidate,
}

/// Partition of `main.files ∪ candidate.files`. Every path lands in exactly one
/// bucket; a move accounts for both its old and its new path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
    /// old path -> new path
    pub moved: BTreeMap<String, String>,
}

/// Classify every path of the two indices.
///
/// When several main-only paths share the hash of one candidate-only path, the
/// first one in path order is taken as the move source. Which of several
/// identical files was "really" renamed cannot be known from content alone.
pub fn diff(main: &RepositoryIndex, candidate: &RepositoryIndex) -> BranchDiff {
    let mut result = BranchDiff::default();

    let mut unmatched_by_hash: HashMap<&str, VecDeque<&str>> = HashMap::new();
    for (path, hash) in main.content_hashes() {
        if !candidate.contains(path) {
            unmatched_by_hash
                .entry(hash.as_str())
                .or_default()
                .push_back(path.as_str());
        }
    }

    for (path, hash) in candidate.content_hashes() {
        match main.content_hash(path) {
            Some(main_hash) if main_hash == hash => {
                result.unchanged.insert(path.clone());
            }
            Some(_) => {
                result.modified.insert(path.clone());
            }
            None => {
                let source = unmatched_by_hash
                    .get_mut(hash.as_str())
                    .and_then(VecDeque::pop_front);
                match source {
                    Some(old_path) => {
                        result.moved.insert(old_path.to_string(), path.clone());
                    }
                    None => {
                        result.added.insert(path.clone());
                    }
                }
            }
        }
    }

    for path in unmatched_by_hash.into_values().flatten() {
        result.removed.insert(path.to_string());
    }

    tracing::debug!(
        "Branch diff: {} added, {} removed, {} modified, {} moved, {} unchanged",
        result.added.len(),
        result.removed.len(),
        result.modified.len(),
        result.moved.len(),
        result.unchanged.len()
    );

    result
}

impl BranchDiff {
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            removed: self.removed.len(),
            modified: self.modified.len(),
            unchanged: self.unchanged.len(),
            moved: self.moved.len(),
        }
    }

    /// Number of distinct paths covered (a move counts twice).
    #[cfg(test)]
    fn path_count(&self) -> usize {
        self.added.len()
            + self.removed.len()
            + self.modified.len()
            + self.unchanged.len()
            + self.moved.len() * 2
    }

    pub fn is_changed(&self, path: &str) -> bool {
        !self.unchanged.contains(path)
    }

    /// New location of a path that was moved, otherwise the path itself.
    pub fn resolve_move<'a>(&'a self, path: &'a str) -> &'a str {
        self.moved.get(path).map(String::as_str).unwrap_or(path)
    }

    fn is_move_target(&self, path: &str) -> bool {
        self.moved.values().any(|new| new == path)
    }

    /// Which snapshot holds the current content of `path`.
    pub fn revision_for(&self, path: &str) -> Option<Revision> {
        if self.added.contains(path)
            || self.modified.contains(path)
            || self.unchanged.contains(path)
            || self.is_move_target(path)
        {
            Some(Revision::Candidate)
        } else if self.removed.contains(path) || self.moved.contains_key(path) {
            Some(Revision::Main)
        } else {
            None
        }
    }
}

/// Identity of an issue across revisions. Line numbers are left out on purpose
/// since unrelated edits shift them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IssueFingerprint {
    file: String,
    category: Option<IssueCategory>,
    title: String,
}

impl IssueFingerprint {
    fn new(file: &str, issue: &IssueLocationClaim) -> Self {
        let text = if issue.title.trim().is_empty() {
            &issue.description
        } else {
            &issue.title
        };
        Self {
            file: file.to_string(),
            category: issue.category,
            title: normalize_text(text),
        }
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sort issues from the main and candidate revisions into new / fixed /
/// unchanged / modified buckets.
///
/// Main issues are matched to candidate issues by file (moves resolved),
/// category and normalized title. A matched issue is `unchanged` when its file
/// did not change and `modified` otherwise.
pub fn classify_issues(
    main_issues: &[IssueLocationClaim],
    candidate_issues: &[IssueLocationClaim],
    diff: &BranchDiff,
) -> IssueBuckets {
    let mut pending: HashMap<IssueFingerprint, VecDeque<usize>> = HashMap::new();
    for (i, issue) in main_issues.iter().enumerate() {
        let file = diff.resolve_move(&issue.file);
        pending
            .entry(IssueFingerprint::new(file, issue))
            .or_default()
            .push_back(i);
    }

    let mut buckets = IssueBuckets::default();
    let mut matched = vec![false; main_issues.len()];

    for issue in candidate_issues {
        let key = IssueFingerprint::new(&issue.file, issue);
        let counterpart = pending.get_mut(&key).and_then(VecDeque::pop_front);
        match counterpart {
            Some(i) => {
                matched[i] = true;
                let original = &main_issues[i].file;
                let moved = diff.moved.contains_key(original.as_str());
                if moved || diff.is_changed(&issue.file) {
                    buckets.modified.push(issue.clone());
                } else {
                    buckets.unchanged.push(issue.clone());
                }
            }
            None => buckets.new.push(issue.clone()),
        }
    }

    buckets.fixed = main_issues
        .iter()
        .zip(matched)
        .filter(|(_, was_matched)| !was_matched)
        .map(|(issue, _)| issue.clone())
        .collect();

    buckets
}
