//! Durable local queue: every answer, security event and offline period is
//! committed here before any network attempt, and stays until the server has
//! acknowledged the exact revision that was sent.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::client::error::ClientResult;
use crate::models::answer::LocalAnswerRecord;
use crate::models::offline_period::OfflinePeriod;
use crate::models::security_event::{SecurityEvent, SecurityEventKey};

pub trait QueueItem: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Clone + Ord + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

impl QueueItem for LocalAnswerRecord {
    type Key = i32;

    fn key(&self) -> i32 {
        self.question_id
    }
}

impl QueueItem for SecurityEvent {
    type Key = SecurityEventKey;

    fn key(&self) -> SecurityEventKey {
        SecurityEvent::key(self)
    }
}

impl QueueItem for OfflinePeriod {
    type Key = DateTime<Utc>;

    fn key(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: QueueItem")]
pub struct QueueEntry<T: QueueItem> {
    pub item: T,
    /// Bumped on every local write. Acknowledgements carry the revision they saw.
    pub revision: u64,
    pub synced: bool,
}

impl<T: QueueItem> QueueEntry<T> {
    pub fn receipt(&self) -> SyncReceipt<T::Key> {
        SyncReceipt {
            key: self.item.key(),
            revision: self.revision,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReceipt<K> {
    pub key: K,
    pub revision: u64,
}

#[async_trait]
pub trait DurableQueue<T: QueueItem>: Send + Sync {
    /// Inserts or replaces by key and marks the entry unsynced. Returns the new revision.
    async fn put(&self, item: T) -> ClientResult<u64>;

    /// Inserts only when the key is absent. Returns whether it was inserted.
    async fn append(&self, item: T) -> ClientResult<bool>;

    async fn list_unsynced(&self) -> ClientResult<Vec<QueueEntry<T>>>;

    /// Marks entries synced when their revision still matches the receipt.
    /// Returns how many were marked.
    async fn mark_synced(&self, receipts: &[SyncReceipt<T::Key>]) -> ClientResult<usize>;

    async fn list_all(&self) -> ClientResult<Vec<T>>;

    async fn unsynced_count(&self) -> ClientResult<usize> {
        Ok(self.list_unsynced().await?.len())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "T: QueueItem")]
struct Journal<T: QueueItem> {
    next_revision: u64,
    entries: Vec<QueueEntry<T>>,
}

struct QueueCore<T: QueueItem> {
    next_revision: u64,
    entries: BTreeMap<T::Key, QueueEntry<T>>,
}

impl<T: QueueItem> QueueCore<T> {
    fn new() -> Self {
        Self {
            next_revision: 1,
            entries: BTreeMap::new(),
        }
    }

    fn from_journal(journal: Journal<T>) -> Self {
        let entries = journal
            .entries
            .into_iter()
            .map(|e| (e.item.key(), e))
            .collect();
        Self {
            next_revision: journal.next_revision.max(1),
            entries,
        }
    }

    fn to_journal(&self) -> Journal<T> {
        Journal {
            next_revision: self.next_revision,
            entries: self.entries.values().cloned().collect(),
        }
    }

    fn bump(&mut self) -> u64 {
        let revision = self.next_revision;
        self.next_revision += 1;
        revision
    }

    fn put(&mut self, item: T) -> u64 {
        let revision = self.bump();
        self.entries.insert(
            item.key(),
            QueueEntry {
                item,
                revision,
                synced: false,
            },
        );
        revision
    }

    fn append(&mut self, item: T) -> bool {
        let key = item.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        let revision = self.bump();
        self.entries.insert(
            key,
            QueueEntry {
                item,
                revision,
                synced: false,
            },
        );
        true
    }

    fn unsynced(&self) -> Vec<QueueEntry<T>> {
        self.entries.values().filter(|e| !e.synced).cloned().collect()
    }

    fn mark_synced(&mut self, receipts: &[SyncReceipt<T::Key>]) -> usize {
        let mut marked = 0;
        for receipt in receipts {
            if let Some(entry) = self.entries.get_mut(&receipt.key) {
                if entry.revision == receipt.revision && !entry.synced {
                    entry.synced = true;
                    marked += 1;
                }
            }
        }
        marked
    }

    fn all(&self) -> Vec<T> {
        self.entries.values().map(|e| e.item.clone()).collect()
    }
}

/// Process-local queue. Survives nothing but is handy for tests and embedded hosts
/// that persist elsewhere.
pub struct MemoryQueue<T: QueueItem> {
    core: Mutex<QueueCore<T>>,
}

impl<T: QueueItem> MemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            core: Mutex::new(QueueCore::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueCore<T>> {
        self.core.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<T: QueueItem> Default for MemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: QueueItem> DurableQueue<T> for MemoryQueue<T> {
    async fn put(&self, item: T) -> ClientResult<u64> {
        Ok(self.lock().put(item))
    }

    async fn append(&self, item: T) -> ClientResult<bool> {
        Ok(self.lock().append(item))
    }

    async fn list_unsynced(&self) -> ClientResult<Vec<QueueEntry<T>>> {
        Ok(self.lock().unsynced())
    }

    async fn mark_synced(&self, receipts: &[SyncReceipt<T::Key>]) -> ClientResult<usize> {
        Ok(self.lock().mark_synced(receipts))
    }

    async fn list_all(&self) -> ClientResult<Vec<T>> {
        Ok(self.lock().all())
    }
}

/// One JSON journal file per stream. Every mutation rewrites the journal to a
/// sibling temp file, fsyncs it and renames it over the original before returning.
pub struct FileQueue<T: QueueItem> {
    path: PathBuf,
    core: tokio::sync::Mutex<QueueCore<T>>,
}

impl<T: QueueItem> FileQueue<T> {
    pub async fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref().to_path_buf();
        let core = match tokio::fs::read(&path).await {
            Ok(bytes) => QueueCore::from_journal(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                QueueCore::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            core: tokio::sync::Mutex::new(core),
        })
    }

    async fn persist(&self, core: &QueueCore<T>) -> ClientResult<()> {
        let bytes = serde_json::to_vec(&core.to_journal())?;
        let tmp = self.path.with_extension("tmp");

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: QueueItem> DurableQueue<T> for FileQueue<T> {
    async fn put(&self, item: T) -> ClientResult<u64> {
        let mut core = self.core.lock().await;
        let revision = core.put(item);
        self.persist(&core).await?;
        Ok(revision)
    }

    async fn append(&self, item: T) -> ClientResult<bool> {
        let mut core = self.core.lock().await;
        if !core.append(item) {
            return Ok(false);
        }
        self.persist(&core).await?;
        Ok(true)
    }

    async fn list_unsynced(&self) -> ClientResult<Vec<QueueEntry<T>>> {
        Ok(self.core.lock().await.unsynced())
    }

    async fn mark_synced(&self, receipts: &[SyncReceipt<T::Key>]) -> ClientResult<usize> {
        let mut core = self.core.lock().await;
        let marked = core.mark_synced(receipts);
        if marked > 0 {
            self.persist(&core).await?;
        }
        Ok(marked)
    }

    async fn list_all(&self) -> ClientResult<Vec<T>> {
        Ok(self.core.lock().await.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer::AnswerValue;
    use crate::models::security_event::SecurityEventKind;
    use uuid::Uuid;

    fn answer(question_id: i32, option_id: i32) -> LocalAnswerRecord {
        LocalAnswerRecord::new(question_id, AnswerValue::Choice { option_id }, Utc::now())
    }

    #[tokio::test]
    async fn put_supersedes_and_marks_unsynced() {
        let queue: MemoryQueue<LocalAnswerRecord> = MemoryQueue::new();
        queue.put(answer(1, 1)).await.unwrap();
        let entries = queue.list_unsynced().await.unwrap();
        let receipts: Vec<_> = entries.iter().map(QueueEntry::receipt).collect();
        assert_eq!(queue.mark_synced(&receipts).await.unwrap(), 1);
        assert_eq!(queue.unsynced_count().await.unwrap(), 0);

        queue.put(answer(1, 4)).await.unwrap();
        let unsynced = queue.list_unsynced().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].item.value, AnswerValue::Choice { option_id: 4 });
        assert_eq!(queue.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_racing_a_sync_is_not_lost() {
        let queue: MemoryQueue<LocalAnswerRecord> = MemoryQueue::new();
        queue.put(answer(7, 1)).await.unwrap();
        let in_flight = queue.list_unsynced().await.unwrap()[0].receipt();

        queue.put(answer(7, 2)).await.unwrap();
        assert_eq!(queue.mark_synced(&[in_flight]).await.unwrap(), 0);
        assert_eq!(queue.unsynced_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn append_never_overwrites() {
        let queue: MemoryQueue<SecurityEvent> = MemoryQueue::new();
        let event = SecurityEvent::new(Uuid::new_v4(), SecurityEventKind::TabSwitch, Some(3), Utc::now());
        assert!(queue.append(event.clone()).await.unwrap());

        let mut again = event.clone();
        again.duration_seconds = Some(99);
        assert!(!queue.append(again).await.unwrap());
        assert_eq!(queue.list_all().await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn file_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answers.json");

        {
            let queue: FileQueue<LocalAnswerRecord> = FileQueue::open(&path).await.unwrap();
            queue.put(answer(1, 3)).await.unwrap();
            queue.put(answer(2, 5)).await.unwrap();
            let first = queue.list_unsynced().await.unwrap()[0].receipt();
            queue.mark_synced(&[first]).await.unwrap();
        }

        let reopened: FileQueue<LocalAnswerRecord> = FileQueue::open(&path).await.unwrap();
        assert_eq!(reopened.list_all().await.unwrap().len(), 2);
        let unsynced = reopened.list_unsynced().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].item.question_id, 2);

        let revision = reopened.put(answer(3, 1)).await.unwrap();
        assert!(revision > unsynced[0].revision);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn file_queue_keys_events_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.json");
        let queue: FileQueue<SecurityEvent> = FileQueue::open(&path).await.unwrap();

        let at = Utc::now();
        let session = Uuid::new_v4();
        queue
            .append(SecurityEvent::new(session, SecurityEventKind::FocusLost, Some(6), at))
            .await
            .unwrap();
        queue
            .append(SecurityEvent::new(session, SecurityEventKind::MouseLeave, None, at))
            .await
            .unwrap();

        let reopened: FileQueue<SecurityEvent> = FileQueue::open(&path).await.unwrap();
        assert_eq!(reopened.unsynced_count().await.unwrap(), 2);
    }
}
