pub mod capture;
pub mod error;
pub mod events;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod utils;

use std::path::{Path, PathBuf};

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub use capture::{DecodedFrame, FramePayload, PixelFormat};
pub use error::{DecodeError, DeviceOpenError, DeviceWriteError, RelayError};
pub use events::RelayEvent;
pub use pipeline::{SessionController, StartOutcome, StopOutcome, Submitted};

/// Prefix for environment overrides, e.g. `CAMRELAY_SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "CAMRELAY";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Loopback node to write to; auto-detected when unset
    pub device: Option<PathBuf>,
    /// Used when a start request carries no dimensions
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Longest the writer waits for a frame before re-checking its stop flag
    pub take_timeout_ms: u64,
    /// Capacity of the writer notice channel
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Longest accepted client line; a base64 720p JPEG is well under 1 MiB
    pub max_message_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device: None,
                width: 1280,
                height: 720,
            },
            pipeline: PipelineConfig::default(),
            server: ServerConfig {
                bind_address: "0.0.0.0".into(),
                port: 8080,
                max_message_bytes: 8 * 1024 * 1024,
            },
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            take_timeout_ms: 1000,
            event_buffer: 64,
        }
    }
}

impl Config {
    /// Defaults, then `camrelay.toml` (or `path`), then `CAMRELAY_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// `env` replaces the process environment when set
    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let builder = config::Config::builder()
            .set_default("camera.device", Option::<String>::None)?
            .set_default("camera.width", defaults.camera.width as i64)?
            .set_default("camera.height", defaults.camera.height as i64)?
            .set_default(
                "pipeline.take_timeout_ms",
                defaults.pipeline.take_timeout_ms as i64,
            )?
            .set_default("pipeline.event_buffer", defaults.pipeline.event_buffer as i64)?
            .set_default("server.bind_address", defaults.server.bind_address)?
            .set_default("server.port", defaults.server.port as i64)?
            .set_default(
                "server.max_message_bytes",
                defaults.server.max_message_bytes as i64,
            )?;

        let builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("camrelay").required(false)),
        };

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_original_camera_settings() {
        let config = Config::default();
        assert_eq!((config.camera.width, config.camera.height), (1280, 720));
        assert_eq!(config.pipeline.take_timeout_ms, 1000);
        assert!(config.camera.device.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[camera]\ndevice = \"/dev/video10\"\nwidth = 640\n\n[server]\nport = 9100"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.camera.device, Some(PathBuf::from("/dev/video10")));
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.camera.height, 720);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.pipeline.event_buffer, 64);
    }

    fn env(vars: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn env_overrides_nested_keys() {
        let config = Config::load_with_env(
            None,
            env(&[
                ("CAMRELAY_SERVER__PORT", "9000"),
                ("CAMRELAY_CAMERA__DEVICE", "/dev/video42"),
                ("CAMRELAY_PIPELINE__EVENT_BUFFER", "8"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.camera.device, Some(PathBuf::from("/dev/video42")));
        assert_eq!(config.pipeline.event_buffer, 8);
        assert_eq!(config.camera.width, 1280);
    }

    #[test]
    fn env_beats_file_and_ignores_foreign_prefixes() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 9100").unwrap();

        let config = Config::load_with_env(
            Some(file.path()),
            env(&[
                ("CAMRELAY_SERVER__PORT", "9200"),
                ("CAMRELAYX_SERVER__BIND_ADDRESS", "127.0.0.1"),
                ("OTHER_SERVER__BIND_ADDRESS", "127.0.0.1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 9200);
        assert_eq!(config.server.bind_address, "0.0.0.0");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/camrelay.toml"))).is_err());
    }
}
