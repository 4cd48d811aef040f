//! Progress queue names.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// One of the fixed, persisted job-id lists used for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum QueueName {
    /// Every job between stage-1 publish and stage-2 completion
    #[serde(rename = "queue_list")]
    Overall,
    /// Jobs waiting on the structure-from-motion worker
    #[serde(rename = "sfm_list")]
    Sfm,
    /// Jobs waiting on the neural-field training worker
    #[serde(rename = "nerf_list")]
    Nerf,
}

impl QueueName {
    /// All valid queues.
    pub const ALL: [QueueName; 3] = [QueueName::Overall, QueueName::Sfm, QueueName::Nerf];

    /// Stage queues in pipeline order.
    pub const STAGES: [QueueName; 2] = [QueueName::Sfm, QueueName::Nerf];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Overall => "queue_list",
            QueueName::Sfm => "sfm_list",
            QueueName::Nerf => "nerf_list",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| ModelError::InvalidQueueName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for queue in QueueName::ALL {
            assert_eq!(queue.as_str().parse::<QueueName>().unwrap(), queue);
        }
        assert!("render_list".parse::<QueueName>().is_err());
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(QueueName::STAGES, [QueueName::Sfm, QueueName::Nerf]);
        assert!(!QueueName::STAGES.contains(&QueueName::Overall));
    }

    #[test]
    fn test_serde_uses_list_names() {
        assert_eq!(serde_json::to_string(&QueueName::Sfm).unwrap(), "\"sfm_list\"");
    }
}
