//! Job record store.
//!
//! A record is a Redis hash with one JSON field per sub-document, so each
//! pipeline stage writes only the fields it owns.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use vgn_models::{JobId, JobRecord, RenderOutputs, Sfm, Video};

use crate::client::RedisStore;
use crate::error::{StoreError, StoreResult};

const FIELD_ID: &str = "id";
const FIELD_NAME: &str = "name";
const FIELD_VIDEO: &str = "video";
const FIELD_SFM: &str = "sfm";
const FIELD_CONFIG: &str = "config";
const FIELD_NERF: &str = "nerf";
const FIELD_CREATED_AT: &str = "created_at";

// Create-if-absent. ARGV holds field/value pairs. Returns 1 on create, 0 if the key exists.
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

/// Per-job document access needed by the pipeline.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, record: &JobRecord) -> StoreResult<()>;

    /// Fetch a record.
    async fn get(&self, id: &JobId) -> StoreResult<Option<JobRecord>>;

    /// Attach stage-1 output and the reported video dimensions.
    /// Returns the updated record.
    async fn set_sfm(&self, id: &JobId, sfm: &Sfm, width: u32, height: u32) -> StoreResult<JobRecord>;

    /// Replace the render outputs.
    async fn set_render_outputs(&self, id: &JobId, outputs: &RenderOutputs) -> StoreResult<()>;

    /// Fetch a record, failing with `NotFound` if it does not exist.
    async fn require(&self, id: &JobId) -> StoreResult<JobRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

/// Job record store on Redis hashes.
pub struct RedisJobRecordStore {
    store: RedisStore,
    create_script: redis::Script,
}

impl RedisJobRecordStore {
    pub fn new(store: RedisStore) -> Self {
        Self {
            store,
            create_script: redis::Script::new(CREATE_SCRIPT),
        }
    }

    fn key(&self, id: &JobId) -> String {
        self.store.key("scenes", id.as_str())
    }

    fn field<T: DeserializeOwned>(
        key: &str,
        fields: &HashMap<String, String>,
        name: &str,
    ) -> StoreResult<Option<T>> {
        match fields.get(name) {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| StoreError::corrupt(key, format!("field {}: {}", name, e))),
            None => Ok(None),
        }
    }

    fn required<T: DeserializeOwned>(
        key: &str,
        fields: &HashMap<String, String>,
        name: &str,
    ) -> StoreResult<T> {
        Self::field(key, fields, name)?
            .ok_or_else(|| StoreError::corrupt(key, format!("missing field {}", name)))
    }

    fn record_from_fields(key: &str, fields: &HashMap<String, String>) -> StoreResult<JobRecord> {
        let created_at: DateTime<Utc> = Self::required(key, fields, FIELD_CREATED_AT)?;
        Ok(JobRecord {
            id: Self::required(key, fields, FIELD_ID)?,
            name: Self::required(key, fields, FIELD_NAME)?,
            video: Self::required(key, fields, FIELD_VIDEO)?,
            sfm: Self::field(key, fields, FIELD_SFM)?,
            config: Self::required(key, fields, FIELD_CONFIG)?,
            nerf: Self::field(key, fields, FIELD_NERF)?,
            created_at,
        })
    }

    fn fields_from_record(record: &JobRecord) -> StoreResult<Vec<(&'static str, String)>> {
        let mut fields = vec![
            (FIELD_ID, serde_json::to_string(&record.id)?),
            (FIELD_NAME, serde_json::to_string(&record.name)?),
            (FIELD_VIDEO, serde_json::to_string(&record.video)?),
            (FIELD_CONFIG, serde_json::to_string(&record.config)?),
            (FIELD_CREATED_AT, serde_json::to_string(&record.created_at)?),
        ];
        if let Some(sfm) = &record.sfm {
            fields.push((FIELD_SFM, serde_json::to_string(sfm)?));
        }
        if let Some(nerf) = &record.nerf {
            fields.push((FIELD_NERF, serde_json::to_string(nerf)?));
        }
        Ok(fields)
    }
}

#[async_trait]
impl JobRecordStore for RedisJobRecordStore {
    async fn create(&self, record: &JobRecord) -> StoreResult<()> {
        let fields = Self::fields_from_record(record)?;
        let mut conn = self.store.connection().await?;
        let created: i64 = self
            .create_script
            .key(self.key(&record.id))
            .arg(fields)
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }

        info!(job_id = %record.id, "Created job record");
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<JobRecord>> {
        let mut conn = self.store.connection().await?;
        let key = self.key(id);
        let fields: HashMap<String, String> =
            redis::cmd("HGETALL").arg(&key).query_async(&mut conn).await?;

        if fields.is_empty() {
            return Ok(None);
        }
        Self::record_from_fields(&key, &fields).map(Some)
    }

    async fn set_sfm(&self, id: &JobId, sfm: &Sfm, width: u32, height: u32) -> StoreResult<JobRecord> {
        let mut record = self.require(id).await?;
        record.video.width = Some(width);
        record.video.height = Some(height);
        record.sfm = Some(sfm.clone());

        let mut conn = self.store.connection().await?;
        redis::cmd("HSET")
            .arg(self.key(id))
            .arg(FIELD_VIDEO)
            .arg(serde_json::to_string::<Video>(&record.video)?)
            .arg(FIELD_SFM)
            .arg(serde_json::to_string(sfm)?)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %id, frames = sfm.frames.len(), "Saved structure-from-motion output");
        Ok(record)
    }

    async fn set_render_outputs(&self, id: &JobId, outputs: &RenderOutputs) -> StoreResult<()> {
        let mut conn = self.store.connection().await?;
        let key = self.key(id);

        let exists: bool = redis::cmd("EXISTS").arg(&key).query_async(&mut conn).await?;
        if !exists {
            return Err(StoreError::NotFound(id.clone()));
        }

        redis::cmd("HSET")
            .arg(&key)
            .arg(FIELD_NERF)
            .arg(serde_json::to_string(outputs)?)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %id, outputs = outputs.len(), "Saved render outputs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgn_models::{Frame, NerfTrainingConfig, OutputType};

    fn sample_record() -> JobRecord {
        let mut record = JobRecord::new(
            JobId::new(),
            Some("Desk".to_string()),
            Video::new("data/raw/videos/desk.mp4"),
            NerfTrainingConfig::default(),
        );
        record.sfm = Some(Sfm {
            intrinsic_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            frames: vec![Frame {
                file_path: "http://host/worker-data/data/sfm/x/1.png".to_string(),
                extrinsic_matrix: [[0.0; 4]; 4],
            }],
            white_background: true,
        });
        let mut outputs = RenderOutputs::default();
        outputs.insert(OutputType::Video, 1_000, "data/nerf/x/video/iteration_1000/x.mp4");
        record.nerf = Some(outputs);
        record
    }

    #[test]
    fn test_fields_roundtrip() {
        let record = sample_record();
        let fields: HashMap<String, String> = RedisJobRecordStore::fields_from_record(&record)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        assert_eq!(fields.len(), 7);
        let back = RedisJobRecordStore::record_from_fields("k", &fields).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let mut record = sample_record();
        record.sfm = None;
        record.nerf = None;
        let fields = RedisJobRecordStore::fields_from_record(&record).unwrap();
        assert!(fields.iter().all(|(k, _)| *k != FIELD_SFM && *k != FIELD_NERF));
    }

    #[test]
    fn test_missing_required_field_is_corrupt() {
        let fields = HashMap::from([(FIELD_NAME.to_string(), "\"x\"".to_string())]);
        let err = RedisJobRecordStore::record_from_fields("k", &fields).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
