//! Local materialization of worker artifacts.
//!
//! Workers hand back URLs; the orchestrator copies each file into the data
//! directory so it can be served from here after the worker forgets it.
//!
//! Layout, relative to the data directory:
//! - frames: `sfm/<job-id>/<url basename>`
//! - render outputs: `nerf/<job-id>/<output type>/iteration_<n>/<job-id>.<ext>`

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::StreamExt;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use vgn_models::{JobId, OutputType, Sfm};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

/// Downloads worker artifacts into the data directory.
pub struct ArtifactStore {
    http: Client,
    config: PipelineConfig,
}

impl ArtifactStore {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let http = Client::builder()
            .timeout(config.download_timeout)
            .user_agent(concat!("vgn-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::download_failed("<client>", e))?;
        Ok(Self { http, config })
    }

    /// Data-relative path for a frame image.
    pub fn frame_path(id: &JobId, url: &str) -> PipelineResult<PathBuf> {
        let parsed = Url::parse(url).map_err(|_| PipelineError::InvalidArtifactUrl(url.to_string()))?;
        let basename = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty() && *name != "..")
            .ok_or_else(|| PipelineError::InvalidArtifactUrl(url.to_string()))?;

        Ok(PathBuf::from("sfm").join(id.as_str()).join(basename))
    }

    /// Data-relative path for a render output checkpoint.
    pub fn render_output_path(id: &JobId, output_type: OutputType, iteration: u32) -> PathBuf {
        PathBuf::from("nerf")
            .join(id.as_str())
            .join(output_type.as_str())
            .join(format!("iteration_{}", iteration))
            .join(format!("{}.{}", id, output_type.extension()))
    }

    /// Download every frame and point its reference at the local copy.
    pub async fn materialize_frames(&self, id: &JobId, sfm: &mut Sfm) -> PipelineResult<()> {
        for frame in &mut sfm.frames {
            let relative = Self::frame_path(id, &frame.file_path)?;
            self.download(&frame.file_path, &self.config.local_path(&relative))
                .await?;
            frame.file_path = self.config.public_url(&relative);
        }
        Ok(())
    }

    /// Download one render output; returns its data-relative path.
    pub async fn materialize_render_output(
        &self,
        id: &JobId,
        output_type: OutputType,
        iteration: u32,
        url: &str,
    ) -> PipelineResult<String> {
        Url::parse(url).map_err(|_| PipelineError::InvalidArtifactUrl(url.to_string()))?;
        let relative = Self::render_output_path(id, output_type, iteration);
        self.download(url, &self.config.local_path(&relative)).await?;
        Ok(relative.to_string_lossy().replace('\\', "/"))
    }

    /// Stream `url` into `dest`. Writes to a sibling `.part` file first so a
    /// failed download never leaves a truncated artifact in place.
    pub async fn download(&self, url: &str, dest: &Path) -> PipelineResult<u64> {
        let started = Instant::now();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::download_failed(url, e))?;

        let partial = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    tokio::fs::remove_file(&partial).await.ok();
                    return Err(PipelineError::download_failed(url, e));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, dest).await?;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_download(written, elapsed);
        debug!(url, path = %dest.display(), bytes = written, "Downloaded artifact");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vgn_models::Frame;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            public_base_url: "http://orchestrator:5000/".to_string(),
            ..PipelineConfig::default()
        })
        .unwrap()
    }

    fn id() -> JobId {
        JobId::parse("65f1c0de0000000000000001").unwrap()
    }

    #[test]
    fn test_frame_path_uses_url_basename() {
        let path = ArtifactStore::frame_path(&id(), "http://w:8000/out/frames/0007.png?x=1").unwrap();
        assert_eq!(path, PathBuf::from("sfm/65f1c0de0000000000000001/0007.png"));

        assert!(matches!(
            ArtifactStore::frame_path(&id(), "http://w:8000/"),
            Err(PipelineError::InvalidArtifactUrl(_))
        ));
        assert!(ArtifactStore::frame_path(&id(), "not a url").is_err());
    }

    #[test]
    fn test_render_output_path() {
        let path = ArtifactStore::render_output_path(&id(), OutputType::PointCloud, 7_000);
        assert_eq!(
            path,
            PathBuf::from(
                "nerf/65f1c0de0000000000000001/point_cloud/iteration_7000/65f1c0de0000000000000001.ply"
            )
        );
    }

    #[tokio::test]
    async fn test_materialize_frames_rewrites_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/frames/0001.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let artifacts = store(&dir);
        let mut sfm = Sfm {
            intrinsic_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            frames: vec![Frame {
                file_path: format!("{}/frames/0001.png", server.uri()),
                extrinsic_matrix: [[0.0; 4]; 4],
            }],
            white_background: false,
        };

        artifacts.materialize_frames(&id(), &mut sfm).await.unwrap();

        assert_eq!(
            sfm.frames[0].file_path,
            "http://orchestrator:5000/worker-data/sfm/65f1c0de0000000000000001/0001.png"
        );
        let saved = dir.path().join("sfm/65f1c0de0000000000000001/0001.png");
        assert_eq!(std::fs::read(saved).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let artifacts = store(&dir);
        let err = artifacts
            .materialize_render_output(&id(), OutputType::Video, 1_000, &format!("{}/v.mp4", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::DownloadFailed { .. }));
        assert!(err.is_retryable());
        let target = dir
            .path()
            .join(ArtifactStore::render_output_path(&id(), OutputType::Video, 1_000));
        assert!(!target.exists());
    }
}
