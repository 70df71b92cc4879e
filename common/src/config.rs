use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_peer_address")]
    pub address: IpAddr,
    /// The peer's inbound port; our outbound datagrams go here.
    #[serde(default = "default_send_port")]
    pub send_port: u16,
    /// Our inbound port.
    #[serde(default = "default_recv_port")]
    pub recv_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Requested kernel send and receive buffer size for both sockets.
    #[serde(default = "default_socket_buffer_bytes")]
    pub socket_buffer_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// `skin` (built in) or `model` (needs the `face-model` feature).
    #[serde(default = "default_detector_backend")]
    pub backend: String,
    /// UltraFace RFB-320 ONNX file, used by the `model` backend.
    #[serde(default = "default_model_path")]
    pub model: PathBuf,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    #[serde(default = "default_quality")]
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_initial_filter")]
    pub initial_filter: String,
    /// Empty disables snapshots.
    #[serde(default)]
    pub snapshot_dir: String,
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            address: default_peer_address(),
            send_port: default_send_port(),
            recv_port: default_recv_port(),
            bind_address: default_bind_address(),
            socket_buffer_bytes: default_socket_buffer_bytes(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            index: 0,
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: default_detector_backend(),
            model: default_model_path(),
            score_threshold: default_score_threshold(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: default_assets_dir(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            render_interval_ms: default_render_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            initial_filter: default_initial_filter(),
            snapshot_dir: String::new(),
            snapshot_every: default_snapshot_every(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Like [`Config::load`], but a file that does not exist yields the
    /// built-in defaults instead of an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

impl PeerConfig {
    /// Where outbound frames are sent.
    pub fn peer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.send_port)
    }

    /// Where inbound frames are received.
    pub fn inbound_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.recv_port)
    }
}

impl SessionConfig {
    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn snapshot_dir(&self) -> Option<&Path> {
        if self.snapshot_dir.is_empty() {
            None
        } else {
            Some(Path::new(&self.snapshot_dir))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_peer_address() -> IpAddr {
    IpAddr::from([192, 168, 43, 225])
}
fn default_send_port() -> u16 {
    5001
}
fn default_recv_port() -> u16 {
    5000
}
fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_socket_buffer_bytes() -> usize {
    1_000_000
}
fn default_backend() -> String {
    "device".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_detector_backend() -> String {
    "skin".into()
}
fn default_model_path() -> PathBuf {
    PathBuf::from("models/version-RFB-320.onnx")
}
fn default_score_threshold() -> f32 {
    0.7
}
fn default_quality() -> u8 {
    30
}
fn default_assets_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_render_interval_ms() -> u64 {
    10
}
fn default_shutdown_timeout_ms() -> u64 {
    1000
}
fn default_initial_filter() -> String {
    "none".into()
}
fn default_snapshot_every() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.peer.send_port, 5001);
        assert_eq!(config.peer.recv_port, 5000);
        assert_eq!(config.peer.socket_buffer_bytes, 1_000_000);
        assert_eq!(config.detector.backend, "skin");
        assert_eq!(config.codec.quality, 30);
        assert_eq!(config.session.render_interval_ms, 10);
        assert_eq!(config.session.initial_filter, "none");
        assert!(config.session.snapshot_dir().is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [peer]
            address = "10.0.0.7"
            send_port = 6001

            [camera]
            backend = "test_pattern"

            [detector]
            backend = "model"
            score_threshold = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.peer.peer_addr(), "10.0.0.7:6001".parse().unwrap());
        assert_eq!(config.peer.inbound_addr(), "0.0.0.0:5000".parse().unwrap());
        assert_eq!(config.camera.backend, "test_pattern");
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.detector.backend, "model");
        assert_eq!(config.detector.score_threshold, 0.5);
        assert_eq!(
            config.detector.model,
            PathBuf::from("models/version-RFB-320.onnx")
        );
    }

    #[test]
    fn bad_address_is_parse_error() {
        let result: Result<Config, _> = toml::from_str("[peer]\naddress = \"not-an-ip\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default(Path::new("/nonexistent/facecall.toml")).unwrap();
        assert_eq!(config.peer.recv_port, 5000);
        assert!(matches!(
            Config::load(Path::new("/nonexistent/facecall.toml")),
            Err(ConfigError::ReadFile(..))
        ));
    }
}
