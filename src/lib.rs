pub mod capture;
pub mod driver;
pub mod pipeline;
pub mod runloop;
pub mod session;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use capture::dispatcher::DispatchConfig;
use capture::frame::{FrameMode, ModeError, Resolution};
use driver::{LedState, LogLevel};
use pipeline::publisher::Publisher;

pub use capture::{CaptureDispatcher, ElementType, VideoBuffer};
pub use session::{Session, SessionError, SessionState};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "KINECT_PUBLISH_CONFIG";
const DEFAULT_CONFIG_NAME: &str = "kinect-publish";
const ENV_PREFIX: &str = "KINECT_PUBLISH";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub depth: DepthConfig,
    pub color: ColorConfig,
    pub publish: PublishConfig,
    pub run: RunConfig,
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub index: usize,
    pub tilt_degrees: f64,
    pub led: LedState,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthConfig {
    pub resolution: Resolution,
    pub sink: String,
    /// Gamma-mapped depth sink; empty disables it
    pub intensity_sink: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorConfig {
    pub resolution: Resolution,
    pub sink: String,
    pub grayscale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Directory the sink names are resolved against
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub poll_interval_ms: u64,
    pub heartbeat: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub synthetic_devices: usize,
    pub frame_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                index: 0,
                tilt_degrees: 0.0,
                led: LedState::Red,
                log_level: LogLevel::Debug,
            },
            depth: DepthConfig {
                resolution: Resolution::Medium,
                sink: "depth".into(),
                intensity_sink: String::new(),
            },
            color: ColorConfig {
                resolution: Resolution::Medium,
                sink: "image".into(),
                grayscale: false,
            },
            publish: PublishConfig {
                directory: PathBuf::from("."),
            },
            run: RunConfig {
                poll_interval_ms: 20,
                heartbeat: "#end".into(),
            },
            driver: DriverConfig {
                synthetic_devices: 1,
                frame_rate: 30,
            },
        }
    }
}

impl Config {
    /// Defaults, overlaid by the optional config file, overlaid by
    /// `KINECT_PUBLISH__SECTION__KEY` environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_NAME.into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    fn sink(&self, name: &str) -> Publisher {
        Publisher::new(self.publish.directory.join(name))
    }

    /// Validate stream modes and resolve sinks
    pub fn dispatch_config(&self) -> Result<DispatchConfig, ModeError> {
        Ok(DispatchConfig {
            depth_mode: FrameMode::depth(self.depth.resolution)?,
            color_mode: FrameMode::color(self.color.resolution)?,
            depth_sink: self.sink(&self.depth.sink),
            color_sink: self.sink(&self.color.sink),
            intensity_sink: (!self.depth.intensity_sink.is_empty())
                .then(|| self.sink(&self.depth.intensity_sink)),
            grayscale: self.color.grayscale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_describe_medium_streams() {
        let dispatch = Config::default().dispatch_config().unwrap();
        assert_eq!(dispatch.depth_mode.step(), 1280);
        assert_eq!(dispatch.color_mode.step(), 1920);
        assert_eq!(dispatch.depth_sink.path(), Path::new("./depth"));
        assert_eq!(dispatch.color_sink.path(), Path::new("./image"));
        assert!(dispatch.intensity_sink.is_none());
    }

    #[test]
    fn high_resolution_depth_fails_validation() {
        let mut config = Config::default();
        config.depth.resolution = Resolution::High;
        assert!(config.dispatch_config().is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[color]\nresolution = \"low\"\ngrayscale = true\n\n[depth]\nintensity_sink = \"depth-intensity\"\n\n[run]\npoll_interval_ms = 5"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.color.resolution, Resolution::Low);
        assert!(config.color.grayscale);
        assert_eq!(config.color.sink, "image");
        assert_eq!(config.run.poll_interval_ms, 5);
        assert_eq!(config.device.led, LedState::Red);
        assert!(config.dispatch_config().unwrap().intensity_sink.is_some());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.run.heartbeat, "#end");
        assert_eq!(config.driver.frame_rate, 30);
    }
}
