//! Job identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

const JOB_ID_HEX_LEN: usize = 24;

/// Unique identifier for one video's pipeline run.
///
/// Twelve bytes rendered as 24 lowercase hex characters: a big-endian
/// unix-seconds timestamp followed by eight random bytes. Because the
/// timestamp leads and the width is fixed, comparing two ids orders them
/// by creation second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generate a new job ID stamped with the current time.
    pub fn new() -> Self {
        let secs = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let random = Uuid::new_v4();

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..].copy_from_slice(&random.as_bytes()[..8]);

        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Parse a hex job ID, normalizing to lowercase.
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        if s.len() != JOB_ID_HEX_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ModelError::InvalidJobId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl JsonSchema for JobId {
    fn schema_name() -> String {
        "JobId".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_id_is_24_hex() {
        let id = JobId::new();
        assert_eq!(id.as_str().len(), 24);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(JobId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ordering_follows_timestamp() {
        let older = JobId::parse("5f00000000000000000000ff").unwrap();
        let newer = JobId::parse("6000000000000000000000aa").unwrap();
        assert!(older < newer);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(JobId::parse("abc").is_err());
        assert!(JobId::parse("zz0000000000000000000000").is_err());
        assert_eq!(
            JobId::parse("ABCDEF000000000000000000").unwrap().as_str(),
            "abcdef000000000000000000"
        );
    }

    #[test]
    fn test_serde_validates() {
        let id: JobId = serde_json::from_str("\"65a1b2c3d4e5f60718293a4b\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"65a1b2c3d4e5f60718293a4b\"");
        assert!(serde_json::from_str::<JobId>("\"not-an-id\"").is_err());
    }
}
