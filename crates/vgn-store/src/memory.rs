//! In-memory stores.
//!
//! Same semantics as the Redis stores, for tests and local runs without a
//! database.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vgn_models::{JobId, JobRecord, QueueName, RenderOutputs, Sfm};

use crate::error::{StoreError, StoreResult};
use crate::queue_list::{QueueList, QueueListStore};
use crate::scene_repo::JobRecordStore;

/// Queue position store held in process memory.
#[derive(Default)]
pub struct MemoryQueueListStore {
    queues: Mutex<HashMap<QueueName, QueueList>>,
}

impl MemoryQueueListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueListStore for MemoryQueueListStore {
    async fn append(&self, queue: QueueName, id: &JobId) -> StoreResult<()> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(queue)
            .or_insert_with(|| QueueList::new(queue))
            .append(id)
    }

    async fn remove(&self, queue: QueueName, id: &JobId) -> StoreResult<()> {
        let mut queues = self.queues.lock().await;
        match queues.get_mut(&queue) {
            Some(list) => list.remove(id),
            None => Err(StoreError::EmptyQueue(queue)),
        }
    }

    async fn position(&self, queue: QueueName, id: &JobId) -> StoreResult<(usize, usize)> {
        let queues = self.queues.lock().await;
        match queues.get(&queue) {
            Some(list) => list.position(id),
            None => Err(StoreError::NotInQueue {
                queue,
                id: id.clone(),
            }),
        }
    }

    async fn size(&self, queue: QueueName) -> StoreResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(&queue).map(QueueList::len).unwrap_or(0))
    }

    async fn list(&self, queue: QueueName) -> StoreResult<QueueList> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&queue)
            .cloned()
            .unwrap_or_else(|| QueueList::new(queue)))
    }
}

/// Job record store held in process memory.
#[derive(Default)]
pub struct MemoryJobRecordStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRecordStore for MemoryJobRecordStore {
    async fn create(&self, record: &JobRecord) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn set_sfm(&self, id: &JobId, sfm: &Sfm, width: u32, height: u32) -> StoreResult<JobRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.video.width = Some(width);
        record.video.height = Some(height);
        record.sfm = Some(sfm.clone());
        Ok(record.clone())
    }

    async fn set_render_outputs(&self, id: &JobId, outputs: &RenderOutputs) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.nerf = Some(outputs.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgn_models::{NerfTrainingConfig, OutputType, Video};

    fn id(n: u8) -> JobId {
        JobId::parse(&format!("{:024x}", n)).unwrap()
    }

    #[tokio::test]
    async fn test_append_then_remove_restores_queue() {
        let store = MemoryQueueListStore::new();
        store.append(QueueName::Sfm, &id(1)).await.unwrap();
        let before = store.list(QueueName::Sfm).await.unwrap();

        store.append(QueueName::Sfm, &id(2)).await.unwrap();
        store.remove(QueueName::Sfm, &id(2)).await.unwrap();

        assert_eq!(store.list(QueueName::Sfm).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_duplicate_append_does_not_mutate() {
        let store = MemoryQueueListStore::new();
        store.append(QueueName::Overall, &id(1)).await.unwrap();
        store.append(QueueName::Overall, &id(2)).await.unwrap();

        let err = store.append(QueueName::Overall, &id(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInQueue { .. }));
        assert_eq!(store.list(QueueName::Overall).await.unwrap().queue, vec![id(1), id(2)]);
    }

    #[tokio::test]
    async fn test_positions_under_unrelated_mutation() {
        let store = MemoryQueueListStore::new();
        for n in 1..=3 {
            store.append(QueueName::Nerf, &id(n)).await.unwrap();
        }
        assert_eq!(store.position(QueueName::Nerf, &id(2)).await.unwrap(), (1, 3));

        // Appending behind does not move it.
        store.append(QueueName::Nerf, &id(4)).await.unwrap();
        assert_eq!(store.position(QueueName::Nerf, &id(2)).await.unwrap(), (1, 4));

        // Removing a later entry does not move it.
        store.remove(QueueName::Nerf, &id(3)).await.unwrap();
        assert_eq!(store.position(QueueName::Nerf, &id(2)).await.unwrap(), (1, 3));

        // Removing an earlier entry moves it up by exactly one.
        store.remove(QueueName::Nerf, &id(1)).await.unwrap();
        assert_eq!(store.position(QueueName::Nerf, &id(2)).await.unwrap(), (0, 2));
    }

    #[tokio::test]
    async fn test_unwritten_queue() {
        let store = MemoryQueueListStore::new();
        assert_eq!(store.size(QueueName::Sfm).await.unwrap(), 0);
        assert!(store
            .position(QueueName::Sfm, &id(1))
            .await
            .unwrap_err()
            .is_not_in_queue());
        assert!(matches!(
            store.remove(QueueName::Sfm, &id(1)).await,
            Err(StoreError::EmptyQueue(QueueName::Sfm))
        ));
    }

    #[tokio::test]
    async fn test_record_lifecycle() {
        let store = MemoryJobRecordStore::new();
        let record = JobRecord::new(
            id(9),
            None,
            Video::new("data/raw/videos/a.mp4"),
            NerfTrainingConfig::default(),
        );
        store.create(&record).await.unwrap();
        assert!(matches!(
            store.create(&record).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let sfm = Sfm {
            intrinsic_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            frames: Vec::new(),
            white_background: false,
        };
        let updated = store.set_sfm(&id(9), &sfm, 1920, 1080).await.unwrap();
        assert_eq!(updated.video.width, Some(1920));
        assert!(updated.sfm.is_some());

        let mut outputs = RenderOutputs::default();
        outputs.insert(OutputType::Video, 1_000, "v.mp4");
        store.set_render_outputs(&id(9), &outputs).await.unwrap();
        assert_eq!(store.require(&id(9)).await.unwrap().nerf, Some(outputs));

        assert!(matches!(
            store.require(&id(10)).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
