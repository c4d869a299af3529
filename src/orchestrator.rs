use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::IndexCache;
use crate::config::{AppConfig, IndexConfig};
use crate::diff::{self, classify_issues, Revision};
use crate::error::ApiError;
use crate::git::ClonedRepo;
use crate::index::{IndexBuilder, IndexOptions, RepositoryIndex};
use crate::locator::{LocatorOptions, SnippetLocator};
use crate::types::{
    normalize_claim_path, CompareRequest, CompareResponse, IndexRequest, IndexSummary,
    IssueLocationClaim, RawIssueClaim, RepoSource, ValidateRequest, ValidationReport,
};
use crate::validator::LocationValidator;

/// A checked-out tree plus the index built from it. The checkout must outlive
/// any search against the index, since recovery reads files from disk.
struct LoadedRepo {
    repo: ClonedRepo,
    index: RepositoryIndex,
}

/// Entry point shared by the HTTP handlers.
pub struct ReviewEngine {
    cache: Arc<IndexCache>,
    index_config: IndexConfig,
    validator: LocationValidator,
}

impl ReviewEngine {
    pub fn new(cache: Arc<IndexCache>, config: &AppConfig) -> Self {
        let locator = SnippetLocator::new(LocatorOptions {
            max_results: config.search.max_results,
            min_score: config.search.min_score,
            timeout: Some(config.search.timeout()),
            ..Default::default()
        });

        Self {
            cache,
            index_config: config.index.clone(),
            validator: LocationValidator::new(locator),
        }
    }

    pub async fn index_repository(&self, request: IndexRequest) -> Result<IndexSummary, ApiError> {
        let loaded = self.load(&request.source, request.file_patterns).await?;
        Ok(summarize(&loaded.index))
    }

    pub async fn validate_claims(
        &self,
        request: ValidateRequest,
    ) -> Result<ValidationReport, ApiError> {
        let loaded = self.load(&request.source, Vec::new()).await?;
        let LoadedRepo { repo, index } = loaded;

        let report = self.validate_against(request.claims, index, repo.path.clone()).await?;
        drop(repo);
        Ok(report)
    }

    /// Index both revisions, validate the head issues and sort issues from both
    /// sides into new / fixed / unchanged / modified.
    ///
    /// A head issue naming a path whose content only exists in the base
    /// revision (removed, or the old side of a move) is checked against the
    /// base tree; everything else is checked against the head tree.
    pub async fn compare_branches(
        &self,
        request: CompareRequest,
    ) -> Result<CompareResponse, ApiError> {
        let (base, head) = tokio::try_join!(
            self.load(&request.base, Vec::new()),
            self.load(&request.head, Vec::new())
        )?;

        let branch_diff = diff::diff(&base.index, &head.index);
        tracing::info!(
            "Compared {} against {}: {} added, {} removed, {} modified, {} moved",
            head.index.commit_hash(),
            base.index.commit_hash(),
            branch_diff.added.len(),
            branch_diff.removed.len(),
            branch_diff.modified.len(),
            branch_diff.moved.len()
        );

        let base_issues = parse_issues(&request.base_issues);
        let head_issues = parse_issues(&request.head_issues);
        let buckets = classify_issues(&base_issues, &head_issues, &branch_diff);
        let summary = branch_diff.summary();

        let base_summary = summarize(&base.index);
        let head_summary = summarize(&head.index);

        let LoadedRepo { repo: base_repo, index: base_index } = base;
        let LoadedRepo { repo: head_repo, index: head_index } = head;
        let (base_root, head_root) = (base_repo.path.clone(), head_repo.path.clone());
        let claims = request.head_issues;
        let validator = self.validator.clone();

        let validation = tokio::task::spawn_blocking(move || {
            validator.validate_each(&claims, |raw| {
                let on_base = raw
                    .file
                    .as_deref()
                    .map(normalize_claim_path)
                    .and_then(|file| branch_diff.revision_for(&file))
                    == Some(Revision::Main);
                if on_base {
                    (&base_index, base_root.as_path())
                } else {
                    (&head_index, head_root.as_path())
                }
            })
        })
        .await
        .map_err(|e| ApiError::InternalError(format!("Validation task failed: {}", e)))?;
        drop((base_repo, head_repo));

        Ok(CompareResponse {
            base: base_summary,
            head: head_summary,
            diff: summary,
            validation,
            buckets,
        })
    }

    async fn validate_against(
        &self,
        claims: Vec<RawIssueClaim>,
        index: RepositoryIndex,
        root: PathBuf,
    ) -> Result<ValidationReport, ApiError> {
        let validator = self.validator.clone();
        tokio::task::spawn_blocking(move || validator.validate_all(&claims, &index, &root))
            .await
            .map_err(|e| ApiError::InternalError(format!("Validation task failed: {}", e)))
    }

    async fn load(
        &self,
        source: &RepoSource,
        file_patterns: Vec<String>,
    ) -> Result<LoadedRepo, ApiError> {
        let (repo, repo_url) = checkout(source).await?;
        let branch = source.branch().map(str::to_string).or_else(|| repo.branch.clone());
        let builder = self.builder(branch, file_patterns);

        let index = self.cache.get_or_build(&builder, &repo.path, &repo_url).await?;
        Ok(LoadedRepo { repo, index })
    }

    fn builder(&self, branch: Option<String>, file_patterns: Vec<String>) -> IndexBuilder {
        let mut options = IndexOptions::default()
            .with_branch(branch)
            .with_patterns(file_patterns)
            .with_timeout(self.index_config.build_timeout());
        options.max_file_size = self.index_config.max_file_size_bytes;
        options.batch_size = self.index_config.batch_size;
        IndexBuilder::new(options)
    }
}

async fn checkout(source: &RepoSource) -> Result<(ClonedRepo, String), ApiError> {
    match source {
        RepoSource::Local { path, repo_url, .. } => {
            if path.trim().is_empty() {
                return Err(ApiError::BadRequest("source.path is required".to_string()));
            }
            let repo = ClonedRepo::from_local(PathBuf::from(path))?;
            let url = repo_url
                .clone()
                .unwrap_or_else(|| format!("file://{}", repo.path.display()));
            Ok((repo, url))
        }
        RepoSource::Remote { url, branch } => {
            if url.trim().is_empty() {
                return Err(ApiError::BadRequest("source.url is required".to_string()));
            }
            let repo = ClonedRepo::from_url(url, branch.as_deref()).await?;
            Ok((repo, url.clone()))
        }
    }
}

fn parse_issues(raw: &[RawIssueClaim]) -> Vec<IssueLocationClaim> {
    raw.iter()
        .filter_map(|claim| match IssueLocationClaim::try_from(claim.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!("Leaving malformed issue out of comparison: {}", e);
                None
            }
        })
        .collect()
}

fn summarize(index: &RepositoryIndex) -> IndexSummary {
    let stats = index.stats();
    IndexSummary {
        repo_url: index.repo_url().to_string(),
        branch: index.branch().map(str::to_string),
        commit_hash: index.commit_hash().to_string(),
        total_files: stats.total_files,
        total_lines: stats.total_lines,
        total_bytes: stats.total_bytes,
        languages: stats.languages.clone(),
        skipped_files: stats.skipped_files,
        partial: stats.partial,
        build_duration_ms: stats.build_duration_ms,
    }
}
