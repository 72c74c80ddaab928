// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! File-backed storage: one JSON file per record under
//! `<base>/<collection>/<key>.json`.
//!
//! Writes go through a temp file, fsync, then rename, so a crash at any
//! point leaves the previous record intact.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Storage, StorageError};

pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.base_path.join(collection)
    }

    fn record_path(&self, collection: &str, key: &str) -> PathBuf {
        self.collection_dir(collection).join(format!("{}.json", key))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, collection: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let dir = self.collection_dir(collection);
        if !dir.exists() {
            fs::create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;
        }

        let path = self.record_path(collection, key);

        // Write atomically using a temp file
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_err(&temp_path, e))?;
        file.write_all(value.as_bytes())
            .await
            .map_err(|e| io_err(&temp_path, e))?;
        file.sync_all().await.map_err(|e| io_err(&temp_path, e))?;

        // Rename atomically
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_err(&path, e))?;

        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.record_path(collection, key);

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        Ok(Some(contents))
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        let path = self.record_path(collection, key);

        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| io_err(&path, e))?;
        }

        Ok(())
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.collection_dir(collection);

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&dir).await.map_err(|e| io_err(&dir, e))?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }

        Ok(keys)
    }
}
