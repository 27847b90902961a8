//! JSON snapshot helpers shared by the persisted stores.
//!
//! Snapshots are written to a temporary file and renamed into place so a
//! partially written file never replaces a good one.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tokio::fs;

use crate::error::CoreError;

/// Read and deserialize a JSON snapshot.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Serialize and atomically write a JSON snapshot, creating parent
/// directories as needed.
pub async fn dump_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Write a plain text artifact, creating parent directories as needed.
pub async fn dump_text(path: &Path, text: &str) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, text).await?;
    Ok(())
}

/// Append a line to a plain text file, creating it if missing.
pub async fn append_text(path: &Path, text: &str) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let existing = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };
    fs::write(path, existing + text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Snapshot {
        entries: BTreeMap<String, String>,
    }

    #[tokio::test]
    async fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");

        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), "1".to_string());
        let snapshot = Snapshot { entries };

        dump_json(&path, &snapshot).await.unwrap();
        let loaded: Snapshot = load_json(&path).await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error.txt");

        append_text(&path, "first\n").await.unwrap();
        append_text(&path, "second\n").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
