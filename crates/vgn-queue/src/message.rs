//! Stage wire messages.
//!
//! Inputs are what the orchestrator publishes to `sfm-in` / `nerf-in`;
//! results are what the workers send back on `sfm-out` / `nerf-out`.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use vgn_models::{Frame, IntrinsicMatrix, JobId, NerfTrainingConfig, OutputType, Sfm, TrainingMode};

/// Stage-1 input: the source video to reconstruct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SfmJobMessage {
    pub id: JobId,
    /// URL the worker downloads the video from
    pub file_path: String,
}

/// Stage-1 result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SfmResultMessage {
    pub id: String,
    pub vid_width: u32,
    pub vid_height: u32,
    pub sfm: Sfm,
    /// Non-zero when the worker could not reconstruct the scene
    #[serde(default)]
    pub flag: i32,
}

impl SfmResultMessage {
    pub fn succeeded(&self) -> bool {
        self.flag == 0
    }
}

/// Stage-2 input: everything the training worker needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NerfJobMessage {
    pub id: JobId,
    pub vid_width: u32,
    pub vid_height: u32,
    pub frames: Vec<Frame>,
    pub intrinsic_matrix: IntrinsicMatrix,
    pub white_background: bool,
    pub output_types: Vec<OutputType>,
    pub training_mode: TrainingMode,
    pub save_iterations: Vec<u32>,
    pub total_iterations: u32,
}

impl NerfJobMessage {
    pub fn new(id: JobId, width: u32, height: u32, sfm: &Sfm, config: &NerfTrainingConfig) -> Self {
        Self {
            id,
            vid_width: width,
            vid_height: height,
            frames: sfm.frames.clone(),
            intrinsic_matrix: sfm.intrinsic_matrix,
            white_background: sfm.white_background,
            output_types: config.output_types.clone(),
            training_mode: config.training_mode,
            save_iterations: config.save_iterations.clone(),
            total_iterations: config.total_iterations,
        }
    }
}

/// Stage-2 result: remote artifact URLs by output type and iteration.
///
/// Keys stay strings on the wire so unknown output types or iterations
/// surface as validation failures rather than decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NerfResultMessage {
    pub id: String,
    #[serde(default)]
    pub file_paths: BTreeMap<String, BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sfm_result_decodes_worker_payload() {
        let body = json!({
            "id": "65f1c0de0000000000000001",
            "vid_width": 1920,
            "vid_height": 1080,
            "sfm": {
                "intrinsic_matrix": [[1.0, 0.0, 0.5], [0.0, 1.0, 0.5], [0.0, 0.0, 1.0]],
                "frames": [{
                    "file_path": "http://worker/frames/0001.png",
                    "extrinsic_matrix": [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]]
                }],
                "white_background": false
            }
        });

        let msg: SfmResultMessage = serde_json::from_value(body).unwrap();
        assert_eq!(msg.vid_width, 1920);
        assert_eq!(msg.sfm.frames.len(), 1);
        assert!(msg.succeeded());
    }

    #[test]
    fn test_sfm_result_rejects_bad_matrix() {
        let body = json!({
            "id": "x", "vid_width": 1, "vid_height": 1,
            "sfm": { "intrinsic_matrix": [[1.0, 0.0]], "frames": [] }
        });
        assert!(serde_json::from_value::<SfmResultMessage>(body).is_err());
    }

    #[test]
    fn test_nerf_job_wire_format() {
        let id = JobId::parse("65f1c0de0000000000000001").unwrap();
        let sfm = Sfm {
            intrinsic_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            frames: Vec::new(),
            white_background: true,
        };
        let msg = NerfJobMessage::new(id, 640, 480, &sfm, &NerfTrainingConfig::default());
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["id"], "65f1c0de0000000000000001");
        assert_eq!(json["training_mode"], "gaussian");
        assert_eq!(json["output_types"], json!(["video"]));
        assert_eq!(json["save_iterations"], json!([1000, 7000, 30000]));
        assert_eq!(json["white_background"], true);
    }

    #[test]
    fn test_nerf_result_keeps_unknown_keys() {
        let body = json!({
            "id": "65f1c0de0000000000000001",
            "file_paths": { "hologram": { "abc": "http://w/x" } }
        });
        let msg: NerfResultMessage = serde_json::from_value(body).unwrap();
        assert_eq!(msg.file_paths["hologram"]["abc"], "http://w/x");
    }
}
