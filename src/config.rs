use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "CROWDWATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("no [producer] section configured")]
    NoProducer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_crowd_threshold")]
    pub crowd_threshold: i64,
    /// Producer `/video_feed` to embed on the dashboard.
    pub video_feed_url: Option<String>,
}

fn default_crowd_threshold() -> i64 {
    5
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            crowd_threshold: default_crowd_threshold(),
            video_feed_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub camera_id: String,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default)]
    pub device: i32,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_process_every_n_frames")]
    pub process_every_n_frames: u64,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_geolocation_url")]
    pub geolocation_url: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000/update_count".to_string()
}

fn default_frame_width() -> u32 {
    1280
}

fn default_frame_height() -> u32 {
    720
}

fn default_model() -> String {
    "yolov8s.onnx".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_process_every_n_frames() -> u64 {
    1
}

fn default_stream_port() -> u16 {
    8001
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_geolocation_url() -> String {
    "https://ipinfo.io/json".to_string()
}

impl ProducerConfig {
    /// Pinned coordinates, when both are configured.
    pub fn fixed_location(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    pub producer: Option<ProducerConfig>,
}

impl Config {
    /// Loads `$CROWDWATCH_CONFIG`, or `config.toml` when present, or defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from(DEFAULT_CONFIG_PATH)
            }
            Err(_) => {
                tracing::info!("no {} found, using defaults", DEFAULT_CONFIG_PATH);
                Ok(Self::default())
            }
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn producer(&self) -> Result<&ProducerConfig, ConfigError> {
        self.producer.as_ref().ok_or(ConfigError::NoProducer)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dashboard.crowd_threshold < 1 {
            return Err(ConfigError::Invalid(
                "dashboard.crowd_threshold must be at least 1".into(),
            ));
        }

        if let Some(producer) = &self.producer {
            if producer.process_every_n_frames == 0 {
                return Err(ConfigError::Invalid(
                    "producer.process_every_n_frames must be at least 1".into(),
                ));
            }
            if !(producer.confidence_threshold > 0.0 && producer.confidence_threshold <= 1.0) {
                return Err(ConfigError::Invalid(
                    "producer.confidence_threshold must be in (0, 1]".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 8000);
        assert_eq!(config.dashboard.crowd_threshold, 5);
        assert!(config.dashboard.video_feed_url.is_none());
        assert!(config.producer.is_none());
        assert!(matches!(config.producer(), Err(ConfigError::NoProducer)));
    }

    #[test]
    fn test_producer_defaults() {
        let config = Config::parse("[producer]\ncamera_id = \"camera7\"\n").unwrap();
        let producer = config.producer().unwrap();
        assert_eq!(producer.camera_id, "camera7");
        assert_eq!(producer.backend_url, "http://127.0.0.1:8000/update_count");
        assert_eq!(producer.device, 0);
        assert_eq!((producer.frame_width, producer.frame_height), (1280, 720));
        assert_eq!(producer.process_every_n_frames, 1);
        assert_eq!(producer.stream_port, 8001);
        assert!(producer.fixed_location().is_none());
    }

    #[test]
    fn test_fixed_location_needs_both_coordinates() {
        let only_lat = Config::parse("[producer]\ncamera_id = \"c\"\nlatitude = 12.9\n").unwrap();
        assert!(only_lat.producer().unwrap().fixed_location().is_none());

        let both = Config::parse(
            "[producer]\ncamera_id = \"c\"\nlatitude = 12.9\nlongitude = 77.6\n",
        )
        .unwrap();
        assert_eq!(both.producer().unwrap().fixed_location(), Some((12.9, 77.6)));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            Config::parse("[dashboard]\ncrowd_threshold = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[producer]\ncamera_id = \"c\"\nprocess_every_n_frames = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[producer]\ncamera_id = \"c\"\nconfidence_threshold = 1.5\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[http]\nport = \"eighty\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[http]\nport = 9100\n\n[dashboard]\ncrowd_threshold = 12\nvideo_feed_url = \"http://cam1:8001/video_feed\""
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.http.port, 9100);
        assert_eq!(config.dashboard.crowd_threshold, 12);
        assert_eq!(
            config.dashboard.video_feed_url.as_deref(),
            Some("http://cam1:8001/video_feed")
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
