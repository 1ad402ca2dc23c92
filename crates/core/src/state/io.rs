//! # IO Utilities
//!
//! File system operations for the `.roundtable` runtime directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Get the runtime directory path (.roundtable)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROUNDTABLE_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".roundtable")
}

/// Read a file from the runtime directory, `None` if it does not exist
pub async fn read_runtime_file(relative_path: impl AsRef<Path>) -> Result<Option<String>> {
    let path = get_runtime_path().join(relative_path.as_ref());
    if fs::metadata(&path).await.is_err() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read file: {:?}", path))?;
    Ok(Some(content))
}

/// Write a file to the runtime directory, returning its full path
pub async fn write_runtime_file(relative_path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
    let path = get_runtime_path().join(relative_path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_runtime_path() {
        if std::env::var("ROUNDTABLE_RUNTIME_PATH").is_err() {
            assert!(get_runtime_path().ends_with(".roundtable"));
        }
    }

    #[tokio::test]
    async fn test_file_operations() {
        let test_path = "test_io_file.txt";
        let content = "会议记录";

        let written = write_runtime_file(test_path, content).await.unwrap();
        assert!(written.ends_with(test_path));

        let read_back = read_runtime_file(test_path).await.unwrap();
        assert_eq!(read_back.as_deref(), Some(content));

        assert!(read_runtime_file("does_not_exist.txt").await.unwrap().is_none());

        let _ = fs::remove_file(written).await;
    }
}
