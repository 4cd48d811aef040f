//! Processing status reports.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::queue::QueueName;

/// Client-facing view of where a job sits in the pipeline.
///
/// A job that is not processing reports only `processing: false`. A job in
/// the overall queue but momentarily in no stage queue (between a stage-1
/// completion and the stage-2 append) reports overall fields only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingStatus {
    pub processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<QueueName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_size: Option<usize>,
}

impl ProcessingStatus {
    pub fn not_processing() -> Self {
        Self {
            processing: false,
            overall_position: None,
            overall_size: None,
            stage: None,
            stage_position: None,
            stage_size: None,
        }
    }

    /// Processing, with no stage queue currently holding the job.
    pub fn overall(position: usize, size: usize) -> Self {
        Self {
            processing: true,
            overall_position: Some(position),
            overall_size: Some(size),
            ..Self::not_processing()
        }
    }

    pub fn with_stage(mut self, stage: QueueName, position: usize, size: usize) -> Self {
        self.stage = Some(stage);
        self.stage_position = Some(position);
        self.stage_size = Some(size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_processing_serializes_single_field() {
        let json = serde_json::to_value(ProcessingStatus::not_processing()).unwrap();
        assert_eq!(json, serde_json::json!({ "processing": false }));
    }

    #[test]
    fn test_stage_report() {
        let status = ProcessingStatus::overall(2, 5).with_stage(QueueName::Nerf, 0, 1);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["stage"], "nerf_list");
        assert_eq!(json["overall_position"], 2);
        assert_eq!(json["stage_size"], 1);
    }
}
