use crate::config::DetectorConfig;
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};
use thiserror::Error;
use tokio::process::Command;

const STDERR_TAIL: usize = 512;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to launch detector `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Detector exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("Detector produced no output at {0}")]
    MissingOutput(PathBuf),
    #[error("Detector failed: {0}")]
    Other(String),
}

/// Locations handed to the detector for one frame.
#[derive(Debug, Clone, Copy)]
pub struct DetectionRequest<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
}

/// Opaque annotation step: reads `source` and writes an annotated image to `output`.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, request: DetectionRequest<'_>) -> Result<(), DetectorError>;
}

/// Runs an external program per frame, e.g. `python3 detect.py --source ...`.
#[derive(Debug, Clone)]
pub struct ProcessDetector {
    program: String,
    args: Vec<String>,
    weights: PathBuf,
    confidence: f32,
    working_dir: Option<PathBuf>,
}

impl ProcessDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            weights: config.weights.clone(),
            confidence: config.confidence,
            working_dir: config.working_dir.clone(),
        }
    }

    fn render_args(&self, request: &DetectionRequest<'_>) -> Vec<String> {
        let output_dir = request
            .output
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let source = request.source.display().to_string();
        let output = request.output.display().to_string();
        let weights = self.weights.display().to_string();
        let conf = self.confidence.to_string();

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &source)
                    .replace("{output_dir}", &output_dir)
                    .replace("{output}", &output)
                    .replace("{weights}", &weights)
                    .replace("{conf}", &conf)
            })
            .collect()
    }
}

#[async_trait]
impl Detector for ProcessDetector {
    #[tracing::instrument(skip(self), fields(program = %self.program))]
    async fn detect(&self, request: DetectionRequest<'_>) -> Result<(), DetectorError> {
        let args = self.render_args(&request);
        tracing::debug!("Running detector with args {:?}", args);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (timeout) kills the child.
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|source| DetectorError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr
                .get(start..)
                .unwrap_or(&stderr)
                .trim()
                .to_string();
            return Err(DetectorError::Exit {
                status: output.status,
                stderr: tail,
            });
        }

        if !tokio::fs::try_exists(request.output).await.unwrap_or(false) {
            return Err(DetectorError::MissingOutput(request.output.to_path_buf()));
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_detector(script: &str) -> ProcessDetector {
        // `sh -c <script> sh <source> <output>`
        ProcessDetector::new(&DetectorConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
                "{source}".to_string(),
                "{output}".to_string(),
            ],
            weights: PathBuf::from("best.pt"),
            confidence: 0.2,
            timeout_ms: 1_000,
            max_concurrent: 1,
            working_dir: None,
        })
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let detector = ProcessDetector::new(&DetectorConfig {
            program: "python3".to_string(),
            args: vec![
                "detect.py".to_string(),
                "--source".to_string(),
                "{source}".to_string(),
                "--weights".to_string(),
                "{weights}".to_string(),
                "--conf".to_string(),
                "{conf}".to_string(),
                "--project={output_dir}".to_string(),
            ],
            weights: PathBuf::from("../models/best.pt"),
            confidence: 0.2,
            timeout_ms: 1_000,
            max_concurrent: 1,
            working_dir: None,
        });
        let request = DetectionRequest {
            source: Path::new("/tmp/frames/a-0.png"),
            output: Path::new("/tmp/results/a-0.png"),
        };

        assert_eq!(
            detector.render_args(&request),
            vec![
                "detect.py",
                "--source",
                "/tmp/frames/a-0.png",
                "--weights",
                "../models/best.pt",
                "--conf",
                "0.2",
                "--project=/tmp/results",
            ]
        );
    }

    #[tokio::test]
    async fn test_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        std::fs::write(&source, b"frame").unwrap();

        let detector = shell_detector(r#"cp "$1" "$2""#);
        detector
            .detect(DetectionRequest {
                source: &source,
                output: &output,
            })
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"frame");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.png");
        let output = dir.path().join("out.png");

        let detector = shell_detector("echo boom >&2; exit 3");
        let err = detector
            .detect(DetectionRequest {
                source: &source,
                output: &output,
            })
            .await
            .unwrap_err();

        match err {
            DetectorError::Exit { status, stderr } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.png");
        let output = dir.path().join("out.png");

        let detector = shell_detector("exit 0");
        let err = detector
            .detect(DetectionRequest {
                source: &source,
                output: &output,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DetectorError::MissingOutput(path) if path == output));
    }

    #[tokio::test]
    async fn test_unknown_program_is_spawn_failure() {
        let detector = ProcessDetector::new(&DetectorConfig {
            program: "definitely-not-a-detector-binary".to_string(),
            args: vec![],
            weights: PathBuf::from("best.pt"),
            confidence: 0.2,
            timeout_ms: 1_000,
            max_concurrent: 1,
            working_dir: None,
        });

        let err = detector
            .detect(DetectionRequest {
                source: Path::new("in.png"),
                output: Path::new("out.png"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DetectorError::Spawn { .. }));
    }
}
