use serde::Deserialize;
use std::{path::Path, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How the external detector process is launched.
///
/// Each entry of `args` may contain the placeholders `{source}`, `{output}`,
/// `{output_dir}`, `{weights}` and `{conf}`, substituted for every frame.
#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    pub program: String,
    #[serde(default = "default_detector_args")]
    pub args: Vec<String>,
    pub weights: PathBuf,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_detector_args() -> Vec<String> {
    [
        "detect.py",
        "--source",
        "{source}",
        "--weights",
        "{weights}",
        "--conf",
        "{conf}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_confidence() -> f32 {
    0.2
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl DetectorConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.program.trim().is_empty() {
            return Err("detector.program must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "detector.confidence must be within [0, 1], got {}",
                self.confidence
            ));
        }
        if self.max_concurrent == 0 {
            return Err("detector.max_concurrent must be at least 1".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("detector.timeout_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_frames_dir")]
    pub frames_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

fn default_frames_dir() -> PathBuf {
    PathBuf::from("frames")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            frames_dir: default_frames_dir(),
            results_dir: default_results_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Directory,
    Camera,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub min_send_interval_ms: u64,
    pub receipt_delay_ms: u64,
    pub round_trip_timeout_ms: u64,
    pub source: SourceKind,
    pub source_dir: PathBuf,
    pub device: Option<String>,
    pub output_path: PathBuf,
    pub connect_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:4000/ws".to_string(),
            min_send_interval_ms: 5_000,
            receipt_delay_ms: 5_000,
            round_trip_timeout_ms: 60_000,
            source: SourceKind::Directory,
            source_dir: PathBuf::from("captures"),
            device: None,
            output_path: PathBuf::from("processed/latest"),
            connect_retries: 10,
        }
    }
}

impl ClientConfig {
    pub fn get_min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    pub fn get_receipt_delay(&self) -> Duration {
        Duration::from_millis(self.receipt_delay_ms)
    }

    pub fn get_round_trip_timeout(&self) -> Duration {
        Duration::from_millis(self.round_trip_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    get_configuration_from(&base_path.join("configuration"), &environment)
}

pub fn get_configuration_from(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("FR")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    if let Err(e) = config.detector.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BASE: &str = r#"
log_level: info
server:
  host: 127.0.0.1
  port: 4000
detector:
  program: python3
  weights: ../models/best.pt
"#;

    #[test]
    fn test_base_configuration_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), BASE).unwrap();

        let config = get_configuration_from(dir.path(), &Environment::Local).unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:4000");
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.detector.confidence, 0.2);
        assert_eq!(config.detector.get_timeout(), Duration::from_secs(30));
        assert_eq!(config.detector.args[0], "detect.py");
        assert_eq!(config.storage.frames_dir, PathBuf::from("frames"));
        assert_eq!(config.client.get_min_send_interval(), Duration::from_secs(5));
        assert_eq!(config.client.get_receipt_delay(), Duration::from_secs(5));
        assert_eq!(config.client.source, SourceKind::Directory);
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), BASE).unwrap();
        fs::write(
            dir.path().join("production.yaml"),
            "server:\n  host: 0.0.0.0\ndetector:\n  timeout_ms: 500\n",
        )
        .unwrap();

        let config = get_configuration_from(dir.path(), &Environment::Production).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.detector.timeout_ms, 500);
    }

    #[test]
    fn test_invalid_confidence_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.yaml"),
            format!("{}  confidence: 1.5\n", BASE),
        )
        .unwrap();

        let err = get_configuration_from(dir.path(), &Environment::Local).unwrap_err();
        assert!(err.to_string().contains("confidence"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::try_from("DEBUG".to_string()), Ok(LogLevel::Debug));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
