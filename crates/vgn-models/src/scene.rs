//! Job record models.
//!
//! A job record is filled in stage by stage: the video reference and the
//! training config at submission, the structure-from-motion output after
//! stage 1, and render outputs as stage 2 saves checkpoints.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::job::JobId;

/// Name given to jobs submitted without one.
pub const DEFAULT_SCENE_NAME: &str = "Untitled Scene";

/// Upper bound for checkpoint and total iterations.
pub const MAX_ITERATIONS: u32 = 30_000;

/// Default checkpoint iterations.
pub const DEFAULT_SAVE_ITERATIONS: [u32; 3] = [1_000, 7_000, 30_000];

/// Row-major 3x3 camera intrinsic matrix.
pub type IntrinsicMatrix = [[f64; 3]; 3];

/// Row-major 4x4 camera extrinsic matrix.
pub type ExtrinsicMatrix = [[f64; 4]; 4];

/// Neural-field training method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMode {
    #[default]
    Gaussian,
    Tensorf,
}

impl TrainingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMode::Gaussian => "gaussian",
            TrainingMode::Tensorf => "tensorf",
        }
    }

    /// Output types the mode can produce.
    pub fn valid_output_types(&self) -> &'static [OutputType] {
        match self {
            TrainingMode::Gaussian => &[
                OutputType::SplatCloud,
                OutputType::PointCloud,
                OutputType::Video,
            ],
            TrainingMode::Tensorf => &[OutputType::Model, OutputType::Video],
        }
    }

    pub fn supports(&self, output_type: OutputType) -> bool {
        self.valid_output_types().contains(&output_type)
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian" => Ok(TrainingMode::Gaussian),
            "tensorf" => Ok(TrainingMode::Tensorf),
            other => Err(ModelError::InvalidTrainingMode(other.to_string())),
        }
    }
}

/// Renderable artifact produced by stage 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    SplatCloud,
    PointCloud,
    Video,
    Model,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::SplatCloud => "splat_cloud",
            OutputType::PointCloud => "point_cloud",
            OutputType::Video => "video",
            OutputType::Model => "model",
        }
    }

    /// File extension used when the artifact is stored locally.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputType::SplatCloud => "splat",
            OutputType::PointCloud => "ply",
            OutputType::Video => "mp4",
            OutputType::Model => "th",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "splat_cloud" => Ok(OutputType::SplatCloud),
            "point_cloud" => Ok(OutputType::PointCloud),
            "video" => Ok(OutputType::Video),
            "model" => Ok(OutputType::Model),
            other => Err(ModelError::InvalidOutputType(other.to_string())),
        }
    }
}

/// Source video metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    /// Path relative to the served data root
    pub file_path: String,
    /// Unknown until stage 1 reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub frame_count: u32,
}

impl Video {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Default::default()
        }
    }
}

/// One frame selected by the structure-from-motion worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Frame {
    /// Image URL
    pub file_path: String,
    pub extrinsic_matrix: ExtrinsicMatrix,
}

/// Structure-from-motion output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sfm {
    pub intrinsic_matrix: IntrinsicMatrix,
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub white_background: bool,
}

/// Stage-1 settings. Reserved, currently empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SfmTrainingConfig {}

/// Stage-2 settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NerfTrainingConfig {
    pub training_mode: TrainingMode,
    pub output_types: Vec<OutputType>,
    pub save_iterations: Vec<u32>,
    pub total_iterations: u32,
}

impl Default for NerfTrainingConfig {
    fn default() -> Self {
        Self {
            training_mode: TrainingMode::default(),
            output_types: vec![OutputType::Video],
            save_iterations: DEFAULT_SAVE_ITERATIONS.to_vec(),
            total_iterations: MAX_ITERATIONS,
        }
    }
}

impl NerfTrainingConfig {
    /// Validate the config.
    pub fn validate(&self) -> ModelResult<()> {
        if self.output_types.is_empty() {
            return Err(ModelError::invalid_config("At least one output type is required"));
        }
        if let Some(bad) = self
            .output_types
            .iter()
            .find(|t| !self.training_mode.supports(**t))
        {
            return Err(ModelError::invalid_config(format!(
                "Output type {} is not produced by training mode {}",
                bad, self.training_mode
            )));
        }
        if !(1..=MAX_ITERATIONS).contains(&self.total_iterations) {
            return Err(ModelError::invalid_config(format!(
                "Total iterations must be between 1 and {}",
                MAX_ITERATIONS
            )));
        }
        if self.save_iterations.is_empty() {
            return Err(ModelError::invalid_config("At least one save iteration is required"));
        }
        for &iteration in &self.save_iterations {
            if !(1..=MAX_ITERATIONS).contains(&iteration) {
                return Err(ModelError::invalid_config(format!(
                    "Save iteration {} must be between 1 and {}",
                    iteration, MAX_ITERATIONS
                )));
            }
            if iteration > self.total_iterations {
                return Err(ModelError::invalid_config(format!(
                    "Save iteration {} exceeds total iterations {}",
                    iteration, self.total_iterations
                )));
            }
        }
        Ok(())
    }

    /// True if the job asked for `output_type` at checkpoint `iteration`.
    pub fn allows(&self, output_type: OutputType, iteration: u32) -> bool {
        self.output_types.contains(&output_type) && self.save_iterations.contains(&iteration)
    }
}

/// Per-stage training configuration. Fixed at submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TrainingConfig {
    #[serde(default)]
    pub sfm: SfmTrainingConfig,
    pub nerf: NerfTrainingConfig,
}

/// Stage-2 output: local file paths by output type and checkpoint iteration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct RenderOutputs {
    #[serde(default)]
    pub file_paths: BTreeMap<OutputType, BTreeMap<u32, String>>,
    /// Worker-reported status code
    #[serde(default)]
    pub flag: i32,
}

impl RenderOutputs {
    pub fn insert(&mut self, output_type: OutputType, iteration: u32, path: impl Into<String>) {
        self.file_paths
            .entry(output_type)
            .or_default()
            .insert(iteration, path.into());
    }

    /// All saved checkpoints for one output type.
    pub fn paths_for(&self, output_type: OutputType) -> Option<&BTreeMap<u32, String>> {
        self.file_paths.get(&output_type)
    }

    /// Path for one checkpoint, or the latest one when `iteration` is `None`.
    pub fn path_for(&self, output_type: OutputType, iteration: Option<u32>) -> ModelResult<&str> {
        let not_found = || ModelError::NoOutputPaths {
            output_type: output_type.to_string(),
            iteration,
        };

        let paths = self.paths_for(output_type).ok_or_else(not_found)?;
        let entry = match iteration {
            Some(iteration) => paths.get(&iteration),
            None => paths.values().next_back(),
        };
        entry.map(String::as_str).ok_or_else(not_found)
    }

    /// Number of (type, iteration) entries.
    pub fn len(&self) -> usize {
        self.file_paths.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persisted per-job document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub video: Video,
    /// Set once stage 1 completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sfm: Option<Sfm>,
    pub config: TrainingConfig,
    /// Set once stage 2 saves at least one checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nerf: Option<RenderOutputs>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, name: Option<String>, video: Video, nerf_config: NerfTrainingConfig) -> Self {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCENE_NAME.to_string());

        Self {
            id,
            name,
            video,
            sfm: None,
            config: TrainingConfig {
                sfm: SfmTrainingConfig::default(),
                nerf: nerf_config,
            },
            nerf: None,
            created_at: Utc::now(),
        }
    }
}
