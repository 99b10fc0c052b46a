//! `FileStore`: the external version-file collaborator (spec §6). Content
//! is addressed by SHA-256, matching the teacher's use of `sha2` under its
//! artifact-hashing code.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::VersionFile;
use crate::error::Result;
use crate::ids::{ProgramId, VersionId};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn put(&self, program_id: ProgramId, version_id: VersionId, rel_path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
    async fn get(&self, program_id: ProgramId, version_id: VersionId, rel_path: &str) -> Result<Vec<u8>>;
    async fn list(&self, program_id: ProgramId, version_id: VersionId) -> Result<Vec<VersionFile>>;
    async fn delete(&self, program_id: ProgramId, version_id: VersionId, rel_path: Option<&str>) -> Result<()>;
    async fn copy(&self, program_id: ProgramId, from_version: VersionId, to_version: VersionId) -> Result<()>;
    async fn stats(&self, program_id: ProgramId) -> Result<FileStoreStats>;
}

#[derive(Debug, Clone, Default)]
pub struct FileStoreStats {
    pub total_bytes: u64,
    pub file_count: u64,
}

fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

#[derive(Debug, Clone)]
struct StoredFile {
    bytes: Vec<u8>,
    content_type: String,
    hash: String,
}

/// Reference in-memory implementation used by the crate's own tests. Not
/// production persistence, which is out of scope (spec §1, §6).
#[derive(Default)]
pub struct InMemoryFileStore {
    files: Mutex<HashMap<(ProgramId, VersionId, String), StoredFile>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn put(&self, program_id: ProgramId, version_id: VersionId, rel_path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let hash = content_hash(&bytes);
        let storage_key = format!("{program_id}/{version_id}/{rel_path}#{hash}");
        let mut files = self.files.lock().expect("file store mutex poisoned");
        files.insert(
            (program_id, version_id, rel_path.to_string()),
            StoredFile {
                bytes,
                content_type: content_type.to_string(),
                hash,
            },
        );
        Ok(storage_key)
    }

    async fn get(&self, program_id: ProgramId, version_id: VersionId, rel_path: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().expect("file store mutex poisoned");
        files
            .get(&(program_id, version_id, rel_path.to_string()))
            .map(|f| f.bytes.clone())
            .ok_or_else(|| crate::error::TaskGridError::NotFound(format!("{program_id}/{version_id}/{rel_path}")))
    }

    async fn list(&self, program_id: ProgramId, version_id: VersionId) -> Result<Vec<VersionFile>> {
        let files = self.files.lock().expect("file store mutex poisoned");
        Ok(files
            .iter()
            .filter(|((pid, vid, _), _)| *pid == program_id && *vid == version_id)
            .map(|((_, _, path), f)| VersionFile {
                path: path.clone(),
                storage_key: format!("{program_id}/{version_id}/{path}#{}", f.hash),
                hash: f.hash.clone(),
                size: f.bytes.len() as u64,
                file_type: f.content_type.clone(),
            })
            .collect())
    }

    async fn delete(&self, program_id: ProgramId, version_id: VersionId, rel_path: Option<&str>) -> Result<()> {
        let mut files = self.files.lock().expect("file store mutex poisoned");
        match rel_path {
            Some(path) => {
                files.remove(&(program_id, version_id, path.to_string()));
            }
            None => {
                files.retain(|(pid, vid, _), _| !(*pid == program_id && *vid == version_id));
            }
        }
        Ok(())
    }

    async fn copy(&self, program_id: ProgramId, from_version: VersionId, to_version: VersionId) -> Result<()> {
        let mut files = self.files.lock().expect("file store mutex poisoned");
        let to_copy: Vec<_> = files
            .iter()
            .filter(|((pid, vid, _), _)| *pid == program_id && *vid == from_version)
            .map(|((_, _, path), f)| (path.clone(), f.clone()))
            .collect();
        for (path, f) in to_copy {
            files.insert((program_id, to_version, path), f);
        }
        Ok(())
    }

    async fn stats(&self, program_id: ProgramId) -> Result<FileStoreStats> {
        let files = self.files.lock().expect("file store mutex poisoned");
        let matching: Vec<_> = files.iter().filter(|((pid, _, _), _)| *pid == program_id).collect();
        Ok(FileStoreStats {
            total_bytes: matching.iter().map(|(_, f)| f.bytes.len() as u64).sum(),
            file_count: matching.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryFileStore::new();
        let pid = ProgramId::new();
        let vid = VersionId::new();
        store.put(pid, vid, "main.py", b"print(1)".to_vec(), "text/x-python").await.unwrap();
        let bytes = store.get(pid, vid, "main.py").await.unwrap();
        assert_eq!(bytes, b"print(1)");
    }

    #[tokio::test]
    async fn get_missing_file_is_not_found() {
        let store = InMemoryFileStore::new();
        let err = store.get(ProgramId::new(), VersionId::new(), "missing.py").await.unwrap_err();
        assert!(matches!(err, crate::error::TaskGridError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_returns_only_matching_version() {
        let store = InMemoryFileStore::new();
        let pid = ProgramId::new();
        let v1 = VersionId::new();
        let v2 = VersionId::new();
        store.put(pid, v1, "a.py", b"a".to_vec(), "text/plain").await.unwrap();
        store.put(pid, v2, "b.py", b"b".to_vec(), "text/plain").await.unwrap();
        let files = store.list(pid, v1).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.py");
    }

    #[tokio::test]
    async fn copy_duplicates_files_into_target_version() {
        let store = InMemoryFileStore::new();
        let pid = ProgramId::new();
        let v1 = VersionId::new();
        let v2 = VersionId::new();
        store.put(pid, v1, "a.py", b"a".to_vec(), "text/plain").await.unwrap();
        store.copy(pid, v1, v2).await.unwrap();
        let bytes = store.get(pid, v2, "a.py").await.unwrap();
        assert_eq!(bytes, b"a");
    }

    #[tokio::test]
    async fn content_hash_is_stable() {
        let store = InMemoryFileStore::new();
        let pid = ProgramId::new();
        let vid = VersionId::new();
        let key1 = store.put(pid, vid, "a.py", b"same".to_vec(), "text/plain").await.unwrap();
        let key2 = store.put(pid, vid, "a.py", b"same".to_vec(), "text/plain").await.unwrap();
        assert_eq!(key1, key2);
    }
}
