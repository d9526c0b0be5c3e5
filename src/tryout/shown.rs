use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// On-disk layout of the shown-id file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ShownFile {
    ids: Vec<Uuid>,
}

/// Capped, persisted set of job ids this display has already shown.
///
/// Ids are kept in insertion order; once `capacity` is reached the oldest id
/// is evicted. Every insert is written through to disk (temp file + rename)
/// so a restart never re-shows a result.
#[derive(Debug)]
pub struct ShownStore {
    path: Option<PathBuf>,
    capacity: usize,
    order: VecDeque<Uuid>,
    index: HashSet<Uuid>,
}

impl ShownStore {
    /// Load from `path`. A missing file starts empty; a corrupt one is logged and reset.
    pub async fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, ShownStoreError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::with_path(Some(path.clone()), capacity);

        let ids = match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice::<ShownFile>(&raw) {
                Ok(file) => file.ids,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Shown-id file is corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ShownStoreError::Io(e)),
        };

        for id in ids {
            store.remember(id);
        }
        tracing::debug!(path = %path.display(), count = store.len(), "Loaded shown job ids");
        Ok(store)
    }

    /// A store that is never written to disk.
    pub fn in_memory(capacity: usize) -> Self {
        Self::with_path(None, capacity)
    }

    fn with_path(path: Option<PathBuf>, capacity: usize) -> Self {
        Self {
            path,
            capacity: capacity.max(1),
            order: VecDeque::new(),
            index: HashSet::new(),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Oldest first.
    pub fn ids(&self) -> impl Iterator<Item = &Uuid> {
        self.order.iter()
    }

    /// Record `id` and persist. Returns `false` if it was already present.
    pub async fn insert(&mut self, id: Uuid) -> Result<bool, ShownStoreError> {
        if !self.remember(id) {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    fn remember(&mut self, id: Uuid) -> bool {
        if !self.index.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.index.remove(&evicted);
            }
        }
        true
    }

    async fn persist(&self) -> Result<(), ShownStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = ShownFile {
            ids: self.order.iter().copied().collect(),
        };
        let raw = serde_json::to_vec(&file)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShownStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let mut store = ShownStore::in_memory(10);
        let id = Uuid::new_v4();
        assert!(store.insert(id).await.unwrap());
        assert!(!store.insert(id).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_oldest_evicted_first() {
        let mut store = ShownStore::in_memory(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for id in [a, b, c] {
            store.insert(id).await.unwrap();
        }
        assert!(!store.contains(&a));
        assert!(store.contains(&b));
        assert!(store.contains(&c));
        assert_eq!(store.ids().copied().collect::<Vec<_>>(), vec![b, c]);
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("shown.json");
        let id = Uuid::new_v4();

        {
            let mut store = ShownStore::open(&path, 5).await.unwrap();
            assert!(store.is_empty());
            store.insert(id).await.unwrap();
        }

        let reopened = ShownStore::open(&path, 5).await.unwrap();
        assert!(reopened.contains(&id));
    }

    #[tokio::test]
    async fn test_reopen_with_smaller_capacity_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shown.json");
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        {
            let mut store = ShownStore::open(&path, 10).await.unwrap();
            for id in &ids {
                store.insert(*id).await.unwrap();
            }
        }
        let store = ShownStore::open(&path, 2).await.unwrap();
        assert_eq!(store.ids().copied().collect::<Vec<_>>(), ids[2..].to_vec());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shown.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = ShownStore::open(&path, 5).await.unwrap();
        assert!(store.is_empty());
    }
}
