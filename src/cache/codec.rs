//! Flat, versioned encoding of a [`RepositoryIndex`] for cache stores.

use crate::error::CacheError;
use crate::index::{BuildInfo, FileMetadata, IndexHeader, IndexStats, RepositoryIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SerializedIndex {
    version: u32,
    expires_at: DateTime<Utc>,
    header: IndexHeader,
    stats: IndexStats,
    files: Vec<String>,
    metadata: Vec<(String, FileMetadata)>,
    content_hashes: Vec<(String, String)>,
    extension_index: Vec<(String, Vec<String>)>,
}

pub fn encode(index: &RepositoryIndex, expires_at: DateTime<Utc>) -> Result<String, CacheError> {
    let serialized = SerializedIndex {
        version: FORMAT_VERSION,
        expires_at,
        header: index.header().clone(),
        stats: index.stats().clone(),
        files: index.files().iter().cloned().collect(),
        metadata: index
            .entries()
            .map(|(path, meta)| (path.clone(), meta.clone()))
            .collect(),
        content_hashes: index
            .content_hashes()
            .iter()
            .map(|(path, hash)| (path.clone(), hash.clone()))
            .collect(),
        extension_index: index
            .extension_index()
            .iter()
            .map(|(ext, paths)| (ext.clone(), paths.clone()))
            .collect(),
    };
    serde_json::to_string(&serialized).map_err(CacheError::Encode)
}

/// Restore an index. `Ok(None)` means the entry has expired.
pub fn decode(payload: &str, now: DateTime<Utc>) -> Result<Option<RepositoryIndex>, CacheError> {
    let serialized: SerializedIndex = serde_json::from_str(payload).map_err(CacheError::Decode)?;

    if serialized.version != FORMAT_VERSION {
        return Err(CacheError::Version {
            found: serialized.version,
            expected: FORMAT_VERSION,
        });
    }
    if serialized.expires_at <= now {
        return Ok(None);
    }

    let stored = serialized.stats;
    let index = RepositoryIndex::assemble(
        serialized.header,
        serialized.metadata,
        BuildInfo {
            build_duration_ms: stored.build_duration_ms,
            skipped_files: stored.skipped_files,
            partial: stored.partial,
        },
    );

    if index.files().len() != serialized.files.len()
        || !serialized.files.iter().all(|f| index.contains(f))
    {
        return Err(CacheError::Inconsistent(
            "file set does not match metadata entries".to_string(),
        ));
    }

    let hashes: BTreeMap<String, String> = serialized.content_hashes.into_iter().collect();
    if &hashes != index.content_hashes() {
        return Err(CacheError::Inconsistent(
            "content hashes do not match metadata entries".to_string(),
        ));
    }

    let extensions: BTreeMap<String, Vec<String>> =
        serialized.extension_index.into_iter().collect();
    if &extensions != index.extension_index() {
        return Err(CacheError::Inconsistent(
            "extension index does not match metadata entries".to_string(),
        ));
    }

    if index.stats() != &stored {
        return Err(CacheError::Inconsistent(format!(
            "stored totals ({} files, {} lines) disagree with entries ({} files, {} lines)",
            stored.total_files,
            stored.total_lines,
            index.stats().total_files,
            index.stats().total_lines
        )));
    }

    Ok(Some(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::index_of;
    use chrono::Duration;

    #[test]
    fn test_decode_restores_equal_index() {
        let index = index_of(&[("a.ts", "function foo(){}\n"), ("lib/b.rs", "fn b() {}\n")]);
        let now = Utc::now();
        let payload = encode(&index, now + Duration::minutes(30)).unwrap();

        let restored = decode(&payload, now).unwrap().unwrap();
        assert_eq!(restored, index);
    }

    #[test]
    fn test_payload_is_flattened() {
        let index = index_of(&[("a.ts", "x")]);
        let payload = encode(&index, Utc::now()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(value["files"].is_array());
        assert!(value["metadata"][0].is_array());
        assert_eq!(value["metadata"][0][0], "a.ts");
    }

    #[test]
    fn test_expired_entry_is_none() {
        let index = index_of(&[("a.ts", "x")]);
        let now = Utc::now();
        let payload = encode(&index, now - Duration::seconds(1)).unwrap();
        assert!(decode(&payload, now).unwrap().is_none());
    }

    #[test]
    fn test_garbage_and_tampered_payloads_fail() {
        assert!(matches!(
            decode("{not json", Utc::now()),
            Err(CacheError::Decode(_))
        ));

        let index = index_of(&[("a.ts", "x"), ("b.ts", "y")]);
        let now = Utc::now();
        let payload = encode(&index, now + Duration::minutes(5)).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        value["files"] = serde_json::json!(["a.ts"]);
        let tampered = serde_json::to_string(&value).unwrap();
        assert!(matches!(
            decode(&tampered, now),
            Err(CacheError::Inconsistent(_))
        ));

        value["version"] = serde_json::json!(99);
        let wrong_version = serde_json::to_string(&value).unwrap();
        assert!(matches!(
            decode(&wrong_version, now),
            Err(CacheError::Version { found: 99, .. })
        ));
    }
}
