use crate::error::ApiError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::time::{timeout, Duration};

const CLONE_TIMEOUT_SECS: u64 = 300;
const VALIDATION_TIMEOUT_SECS: u64 = 10;

async fn validate_github_repo(url: &str) -> Result<(), ApiError> {
    let github_api_url = if let Some(captures) = extract_github_info(url) {
        format!("https://api.github.com/repos/{}/{}", captures.0, captures.1)
    } else {
        return Ok(());
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(VALIDATION_TIMEOUT_SECS))
        .build()
        .map_err(|e| ApiError::GitError(format!("Failed to create HTTP client: {}", e)))?;

    let response = client
        .head(&github_api_url)
        .header("User-Agent", "review-locator")
        .send()
        .await
        .map_err(|e| ApiError::GitError(format!("Failed to validate repository: {}", e)))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::GitError(format!("Repository not found: {}", url)));
    }

    if !response.status().is_success() && response.status() != reqwest::StatusCode::FORBIDDEN {
        return Err(ApiError::GitError(format!(
            "Failed to validate repository (status {}): {}",
            response.status(),
            url
        )));
    }

    Ok(())
}

pub fn extract_github_info(url: &str) -> Option<(String, String)> {
    let url = url.trim_end_matches(".git");

    if url.contains("github.com") {
        let parts: Vec<&str> = url.split('/').collect();
        if parts.len() >= 2 {
            let repo = parts[parts.len() - 1];
            let owner = parts[parts.len() - 2];
            if !owner.is_empty() && !repo.is_empty() && owner != "github.com" {
                return Some((owner.to_string(), repo.to_string()));
            }
        }
    }

    None
}

/// A working tree on disk, either cloned into a temp dir or borrowed from a local path.
pub struct ClonedRepo {
    pub path: PathBuf,
    pub branch: Option<String>,
    _temp_dir: Option<TempDir>,
}

impl ClonedRepo {
    pub async fn from_url(url: &str, branch: Option<&str>) -> Result<Self, ApiError> {
        validate_github_repo(url).await?;

        let temp_dir = TempDir::new()
            .map_err(|e| ApiError::GitError(format!("Failed to create temp dir: {}", e)))?;

        let path = temp_dir.path().to_path_buf();
        let url = url.to_string();
        let checkout_branch = branch.map(str::to_string);

        let clone_result = timeout(
            Duration::from_secs(CLONE_TIMEOUT_SECS),
            tokio::task::spawn_blocking(move || {
                let mut builder = git2::build::RepoBuilder::new();
                let mut fetch_opts = git2::FetchOptions::new();
                fetch_opts.depth(1);
                builder.fetch_options(fetch_opts);
                if let Some(ref branch) = checkout_branch {
                    builder.branch(branch);
                }
                builder.clone(&url, &path)
            }),
        )
        .await;

        match clone_result {
            Ok(Ok(Ok(_))) => Ok(Self {
                path: temp_dir.path().to_path_buf(),
                branch: branch.map(str::to_string),
                _temp_dir: Some(temp_dir),
            }),
            Ok(Ok(Err(e))) => Err(ApiError::GitError(format!("Clone failed: {}", e))),
            Ok(Err(e)) => Err(ApiError::GitError(format!("Clone task failed: {}", e))),
            Err(_) => Err(ApiError::GitError("Clone timed out".to_string())),
        }
    }

    pub fn from_local(path: PathBuf) -> Result<Self, ApiError> {
        if !path.exists() {
            return Err(ApiError::GitError(format!(
                "Path does not exist: {:?}",
                path
            )));
        }
        let branch = current_branch(&path);
        Ok(Self {
            path,
            branch,
            _temp_dir: None,
        })
    }
}

/// Full HEAD commit id of the repository at `path`, if it has one.
pub fn head_commit(path: &Path) -> Option<String> {
    let repo = git2::Repository::open(path).ok()?;
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

pub fn current_branch(path: &Path) -> Option<String> {
    let repo = git2::Repository::open(path).ok()?;
    let head = repo.head().ok()?;
    if !head.is_branch() {
        return None;
    }
    head.shorthand().map(str::to_string)
}

/// Paths tracked in the git index, relative to the work tree.
///
/// Returns `None` when `path` is not the root of a git work tree so callers
/// can fall back to scanning the directory.
pub fn tracked_files(path: &Path) -> Option<Vec<String>> {
    let repo = git2::Repository::open(path).ok()?;
    let workdir = repo.workdir()?;
    let same_root = match (workdir.canonicalize(), path.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same_root {
        return None;
    }

    let index = repo.index().ok()?;
    let files = index
        .iter()
        .filter_map(|entry| String::from_utf8(entry.path).ok())
        .collect();
    Some(files)
}
