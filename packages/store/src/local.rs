//! Directory-backed object store.
//!
//! Objects are written to a hidden temporary file next to their final
//! location, flushed to disk, and renamed into place. A crash before the
//! rename leaves only a stray `.*.tmp` file; the canonical path keeps its
//! previous content (or stays absent).

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

use crate::{ObjectMeta, ObjectStore, StoreError, md5_hex};

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

/// An object written to its temporary file but not yet renamed into place.
#[derive(Debug)]
pub struct StagedObject {
    temp_path: PathBuf,
    final_path: PathBuf,
    meta: ObjectMeta,
}

impl StagedObject {
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl LocalStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an object path onto the filesystem, rejecting anything that
    /// could escape the root.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] for empty, absolute, or `..`
    /// paths.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let invalid = |reason| StoreError::InvalidPath {
            path: path.to_string(),
            reason,
        };
        if path.is_empty() || path.ends_with('/') {
            return Err(invalid("path must name a file"));
        }
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                Component::CurDir | Component::ParentDir => {
                    return Err(invalid("relative components are not allowed"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("path must be relative"));
                }
            }
        }
        Ok(self.root.join(relative))
    }

    /// Writes `bytes` to a temporary file beside `path` and syncs it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the path is invalid or the write fails.
    pub async fn stage(&self, path: &str, bytes: &[u8]) -> Result<StagedObject, StoreError> {
        let final_path = self.resolve(path)?;
        let (Some(dir), Some(name)) = (final_path.parent(), final_path.file_name()) else {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "path must name a file",
            });
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error(dir, e))?;

        let temp_path = dir.join(format!(
            ".{}.{}.tmp",
            name.to_string_lossy(),
            uuid::Uuid::new_v4()
        ));

        let result = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_error(&temp_path, e));
        }

        Ok(StagedObject {
            temp_path,
            final_path,
            meta: ObjectMeta {
                size: bytes.len() as u64,
                etag: Some(md5_hex(bytes)),
            },
        })
    }

    /// Renames a staged object over its final path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the rename fails; the temporary file is
    /// removed in that case.
    pub async fn commit(&self, staged: StagedObject) -> Result<ObjectMeta, StoreError> {
        if let Err(e) = tokio::fs::rename(&staged.temp_path, &staged.final_path).await {
            let _ = tokio::fs::remove_file(&staged.temp_path).await;
            return Err(io_error(&staged.final_path, e));
        }
        Ok(staged.meta)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn check_connectivity(&self) -> Result<(), StoreError> {
        let unavailable = |message: String| StoreError::Unavailable {
            target: self.describe(),
            message,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| unavailable(format!("cannot create root: {e}")))?;

        let probe = self
            .root
            .join(format!(".connectivity-{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|e| unavailable(format!("root is not writable: {e}")))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| unavailable(format!("cannot remove probe file: {e}")))?;

        log::debug!("{} is writable", self.describe());
        Ok(())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta {
                size: meta.len(),
                etag: None,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&full, e)),
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&full, e)),
        }
    }

    async fn get_prefix(&self, path: &str, max_bytes: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.resolve(path)?;
        let file = match tokio::fs::File::open(&full).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&full, e)),
        };
        let mut bytes = Vec::new();
        file.take(max_bytes)
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| io_error(&full, e))?;
        Ok(Some(bytes))
    }

    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<ObjectMeta, StoreError> {
        let staged = self.stage(path, bytes).await?;
        self.commit(staged).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "weather-data/location=chicago/year=2023/month=01/weather_data_chicago_2023_01.csv";

    fn temp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[tokio::test]
    async fn put_creates_nested_directories_and_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());

        let body: &[u8] = b"date,temp\n2023-01-01,1\n";

        assert!(!store.exists(PATH).await.unwrap());
        let meta = store.put(PATH, body, "text/csv").await.unwrap();
        assert_eq!(meta.size, body.len() as u64);
        assert_eq!(meta.etag, Some(md5_hex(body)));

        assert!(store.exists(PATH).await.unwrap());
        assert_eq!(store.head(PATH).await.unwrap().unwrap().size, body.len() as u64);
        assert_eq!(store.get(PATH).await.unwrap().unwrap(), body);

        let dir = store.resolve(PATH).unwrap();
        assert!(temp_files(dir.parent().unwrap()).is_empty(), "no temp files left behind");
    }

    #[tokio::test]
    async fn put_replaces_previous_object_wholesale() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());

        store.put(PATH, b"a much longer first version\n", "text/csv").await.unwrap();
        store.put(PATH, b"short\n", "text/csv").await.unwrap();
        assert_eq!(store.get(PATH).await.unwrap().unwrap(), b"short\n");
    }

    #[tokio::test]
    async fn crash_before_commit_keeps_previous_object() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        store.put(PATH, b"old,complete\n1,2\n", "text/csv").await.unwrap();

        // Stage a replacement and never commit it, as if the process died.
        let staged = store.stage(PATH, b"new,partial").await.unwrap();
        assert!(staged.temp_path().exists());
        drop(staged);

        assert_eq!(
            store.get(PATH).await.unwrap().unwrap(),
            b"old,complete\n1,2\n"
        );
    }

    #[tokio::test]
    async fn crash_before_first_commit_leaves_nothing_visible() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());

        let staged = store.stage(PATH, b"new,partial").await.unwrap();
        drop(staged);

        assert!(!store.exists(PATH).await.unwrap());
        assert_eq!(store.get(PATH).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_objects_are_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        assert_eq!(store.head("nope/file.csv").await.unwrap(), None);
        assert_eq!(store.get("nope/file.csv").await.unwrap(), None);
        assert_eq!(store.get_prefix("nope/file.csv", 16).await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefix_reads_stop_at_the_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        store.put(PATH, b"date,temp\n2023-01-01,1\n", "text/csv").await.unwrap();

        assert_eq!(store.get_prefix(PATH, 9).await.unwrap().unwrap(), b"date,temp");
        assert_eq!(
            store.get_prefix(PATH, 1024).await.unwrap().unwrap(),
            b"date,temp\n2023-01-01,1\n"
        );
        assert!(store.get_prefix(PATH, 0).await.unwrap().unwrap().is_empty());
    }

    #[test]
    fn rejects_paths_escaping_the_root() {
        let store = LocalStore::new("/tmp/store");
        for bad in ["", "../etc/passwd", "/etc/passwd", "a/../../b", "dir/"] {
            assert!(
                matches!(store.resolve(bad), Err(StoreError::InvalidPath { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert_eq!(
            store.resolve("a/b.csv").unwrap(),
            PathBuf::from("/tmp/store/a/b.csv")
        );
    }

    #[tokio::test]
    async fn connectivity_creates_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("lake");
        let store = LocalStore::new(&root);

        store.check_connectivity().await.unwrap();
        assert!(root.is_dir());
        assert!(temp_files(&root).is_empty());
    }

    #[tokio::test]
    async fn connectivity_fails_when_root_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("not-a-dir");
        std::fs::write(&root, b"x").unwrap();

        let err = LocalStore::new(&root).check_connectivity().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }
}
