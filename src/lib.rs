pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use error::{Result, StreamError};
pub use pipeline::{ColourSession, FrameCopier, StreamConfigurator};

/// Prefix for environment overrides, e.g. `COLOURSKEL_SENSOR__KIND=synthetic`
pub const ENV_PREFIX: &str = "COLOURSKEL";

/// Device value that triggers auto-detection
pub const AUTO_DEVICE: &str = "auto";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub sensor: SensorConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    V4l2,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// Capture node path, or "auto"
    pub device: String,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub title: String,
    pub snapshot_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensor: SensorConfig {
                kind: SensorKind::V4l2,
                device: AUTO_DEVICE.into(),
                buffer_count: 4,
            },
            display: DisplayConfig {
                enabled: true,
                title: "Colour Stream".into(),
                snapshot_dir: PathBuf::from("."),
            },
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if given, then `COLOURSKEL_*` variables
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
