//! Queue position store.
//!
//! Each valid queue name owns one document, `{"_id": name, "queue": [ids]}`,
//! created lazily on the first append. Membership is unique per queue and
//! order is FIFO by append time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vgn_models::{JobId, QueueName};

use crate::client::RedisStore;
use crate::error::{StoreError, StoreResult};

/// Ordered list of job IDs for one named queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueList {
    #[serde(rename = "_id")]
    pub name: QueueName,
    #[serde(default)]
    pub queue: Vec<JobId>,
}

impl QueueList {
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            queue: Vec::new(),
        }
    }

    /// Append `id`, rejecting duplicates.
    pub fn append(&mut self, id: &JobId) -> StoreResult<()> {
        if self.queue.contains(id) {
            return Err(StoreError::AlreadyInQueue {
                queue: self.name,
                id: id.clone(),
            });
        }
        self.queue.push(id.clone());
        Ok(())
    }

    /// Remove the single entry for `id`, keeping the rest in order.
    pub fn remove(&mut self, id: &JobId) -> StoreResult<()> {
        if self.queue.is_empty() {
            return Err(StoreError::EmptyQueue(self.name));
        }
        let index = self
            .queue
            .iter()
            .position(|entry| entry == id)
            .ok_or_else(|| StoreError::NotInQueue {
                queue: self.name,
                id: id.clone(),
            })?;
        self.queue.remove(index);
        Ok(())
    }

    /// Zero-based index of `id` and the queue length.
    pub fn position(&self, id: &JobId) -> StoreResult<(usize, usize)> {
        let mut found = None;
        for (index, entry) in self.queue.iter().enumerate() {
            if entry == id {
                if found.is_some() {
                    return Err(StoreError::MultipleEntries {
                        queue: self.name,
                        id: id.clone(),
                    });
                }
                found = Some(index);
            }
        }

        found
            .map(|index| (index, self.queue.len()))
            .ok_or_else(|| StoreError::NotInQueue {
                queue: self.name,
                id: id.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Durable ordered-list-per-name abstraction.
#[async_trait]
pub trait QueueListStore: Send + Sync {
    /// Append `id` to `queue`. Fails with `AlreadyInQueue` without mutating.
    async fn append(&self, queue: QueueName, id: &JobId) -> StoreResult<()>;

    /// Remove `id` from `queue`. Fails with `EmptyQueue` or `NotInQueue`.
    async fn remove(&self, queue: QueueName, id: &JobId) -> StoreResult<()>;

    /// Zero-based position of `id` and the queue length.
    async fn position(&self, queue: QueueName, id: &JobId) -> StoreResult<(usize, usize)>;

    /// Queue length; zero for a queue that has never been written.
    async fn size(&self, queue: QueueName) -> StoreResult<usize>;

    /// Snapshot of the whole queue.
    async fn list(&self, queue: QueueName) -> StoreResult<QueueList>;
}

// Push-if-absent. Returns 1 on append, 0 if the id is already present.
const APPEND_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
local doc
if raw then
  doc = cjson.decode(raw)
else
  doc = { _id = ARGV[1], queue = {} }
end
if type(doc.queue) ~= 'table' then
  doc.queue = {}
end
for _, v in ipairs(doc.queue) do
  if v == ARGV[2] then
    return 0
  end
end
table.insert(doc.queue, ARGV[2])
redis.call('SET', KEYS[1], cjson.encode(doc))
return 1
"#;

// Remove-if-present. Returns 1 on removal, 0 if absent, -1 if the queue is empty.
// cjson encodes an empty table as an object, so the empty document is written by hand.
const REMOVE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return -1
end
local doc = cjson.decode(raw)
local queue = doc.queue
if type(queue) ~= 'table' or #queue == 0 then
  return -1
end
local index = nil
for i, v in ipairs(queue) do
  if v == ARGV[2] then
    index = i
    break
  end
end
if not index then
  return 0
end
table.remove(queue, index)
if #queue == 0 then
  redis.call('SET', KEYS[1], '{"_id":' .. cjson.encode(ARGV[1]) .. ',"queue":[]}')
else
  doc.queue = queue
  redis.call('SET', KEYS[1], cjson.encode(doc))
end
return 1
"#;

/// Queue position store on Redis.
///
/// Appends and removals run as Lua scripts, so concurrent publishers cannot
/// lose each other's updates the way a fetch-mutate-store would.
pub struct RedisQueueListStore {
    store: RedisStore,
    append_script: redis::Script,
    remove_script: redis::Script,
}

impl RedisQueueListStore {
    pub fn new(store: RedisStore) -> Self {
        Self {
            store,
            append_script: redis::Script::new(APPEND_SCRIPT),
            remove_script: redis::Script::new(REMOVE_SCRIPT),
        }
    }

    fn key(&self, queue: QueueName) -> String {
        self.store.key("queues", queue.as_str())
    }

    async fn load(&self, queue: QueueName) -> StoreResult<Option<QueueList>> {
        let mut conn = self.store.connection().await?;
        let key = self.key(queue);
        let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;

        match raw {
            Some(raw) => {
                let list: QueueList = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::corrupt(&key, e.to_string()))?;
                Ok(Some(list))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueueListStore for RedisQueueListStore {
    async fn append(&self, queue: QueueName, id: &JobId) -> StoreResult<()> {
        let mut conn = self.store.connection().await?;
        let appended: i64 = self
            .append_script
            .key(self.key(queue))
            .arg(queue.as_str())
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if appended == 0 {
            info!(job_id = %id, queue = %queue, "Attempted to append job already in queue");
            return Err(StoreError::AlreadyInQueue {
                queue,
                id: id.clone(),
            });
        }

        debug!(job_id = %id, queue = %queue, "Appended to queue");
        Ok(())
    }

    async fn remove(&self, queue: QueueName, id: &JobId) -> StoreResult<()> {
        let mut conn = self.store.connection().await?;
        let removed: i64 = self
            .remove_script
            .key(self.key(queue))
            .arg(queue.as_str())
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;

        match removed {
            1 => {
                debug!(job_id = %id, queue = %queue, "Removed from queue");
                Ok(())
            }
            0 => Err(StoreError::NotInQueue {
                queue,
                id: id.clone(),
            }),
            _ => Err(StoreError::EmptyQueue(queue)),
        }
    }

    async fn position(&self, queue: QueueName, id: &JobId) -> StoreResult<(usize, usize)> {
        match self.load(queue).await? {
            Some(list) => list.position(id),
            None => Err(StoreError::NotInQueue {
                queue,
                id: id.clone(),
            }),
        }
    }

    async fn size(&self, queue: QueueName) -> StoreResult<usize> {
        Ok(self.load(queue).await?.map(|list| list.len()).unwrap_or(0))
    }

    async fn list(&self, queue: QueueName) -> StoreResult<QueueList> {
        Ok(self
            .load(queue)
            .await?
            .unwrap_or_else(|| QueueList::new(queue)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> JobId {
        JobId::parse(&format!("{:024x}", n)).unwrap()
    }

    #[test]
    fn test_append_rejects_duplicates() {
        let mut list = QueueList::new(QueueName::Sfm);
        list.append(&id(1)).unwrap();
        let err = list.append(&id(1)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInQueue { .. }));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remove_distinguishes_empty_from_missing() {
        let mut list = QueueList::new(QueueName::Nerf);
        assert!(matches!(list.remove(&id(1)), Err(StoreError::EmptyQueue(QueueName::Nerf))));

        list.append(&id(2)).unwrap();
        assert!(list.remove(&id(1)).unwrap_err().is_not_in_queue());
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut list = QueueList::new(QueueName::Overall);
        for n in 1..=4 {
            list.append(&id(n)).unwrap();
        }
        list.remove(&id(2)).unwrap();
        assert_eq!(list.queue, vec![id(1), id(3), id(4)]);
        assert_eq!(list.position(&id(3)).unwrap(), (1, 3));
    }

    #[test]
    fn test_position_detects_duplicates() {
        let list = QueueList {
            name: QueueName::Sfm,
            queue: vec![id(1), id(1)],
        };
        assert!(matches!(
            list.position(&id(1)),
            Err(StoreError::MultipleEntries { .. })
        ));
    }

    #[test]
    fn test_document_schema() {
        let mut list = QueueList::new(QueueName::Sfm);
        list.append(&id(7)).unwrap();
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "_id": "sfm_list", "queue": ["000000000000000000000007"] })
        );
    }
}
