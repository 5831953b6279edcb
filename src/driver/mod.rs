//! Device driver interface
//!
//! The capture pipeline talks to the sensor only through these traits. A
//! driver invokes the registered callbacks on its own threads.

pub mod synthetic;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::frame::FrameMode;
use crate::capture::pool::VideoBuffer;

pub use synthetic::SyntheticDriver;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver context could not be initialised: {0}")]
    Init(String),
    #[error("no device at index {index} ({available} present)")]
    NoSuchDevice { index: usize, available: usize },
    #[error("device does not support mode {0:?}")]
    UnsupportedMode(FrameMode),
    #[error("tilt angle {0} is out of range")]
    TiltOutOfRange(f64),
    #[error("{stream} stream cannot start: {reason}")]
    Stream { stream: &'static str, reason: String },
    #[error("device was closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Fatal,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    Spew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedState {
    Off,
    Green,
    Red,
    Yellow,
    BlinkGreen,
    BlinkRedYellow,
}

/// Which parts of the device the context should claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subdevices {
    pub motor: bool,
    pub camera: bool,
}

/// Motor and accelerometer readings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TiltState {
    pub angle_degs: f64,
    pub accel: [f64; 3],
}

/// Lets a video callback hand the next buffer to fill back to the driver
pub trait VideoBufferRegistrar {
    fn set_video_buffer(&mut self, buffer: VideoBuffer);
}

/// Called with a borrowed depth frame and its device timestamp
pub type DepthCallback = Arc<dyn Fn(&[u16], u32) + Send + Sync>;

/// Called with the filled video buffer; must register a replacement
pub type VideoCallback = Arc<dyn Fn(VideoBuffer, u32, &mut dyn VideoBufferRegistrar) + Send + Sync>;

/// Entry point of a driver implementation
pub trait Driver {
    fn open_context(&self) -> Result<Box<dyn DriverContext>, DriverError>;
}

pub trait DriverContext: Send {
    fn set_log_level(&mut self, level: LogLevel);
    fn select_subdevices(&mut self, subdevices: Subdevices);
    fn num_devices(&mut self) -> Result<usize, DriverError>;
    fn open_device(&mut self, index: usize) -> Result<Box<dyn Device>, DriverError>;
    fn shutdown(&mut self);
}

pub trait Device: Send {
    fn set_tilt_degs(&mut self, angle: f64) -> Result<(), DriverError>;
    fn set_led(&mut self, led: LedState) -> Result<(), DriverError>;
    fn set_depth_mode(&mut self, mode: FrameMode) -> Result<(), DriverError>;
    fn set_video_mode(&mut self, mode: FrameMode) -> Result<(), DriverError>;
    fn set_depth_callback(&mut self, callback: DepthCallback);
    fn set_video_callback(&mut self, callback: VideoCallback);
    fn set_video_buffer(&mut self, buffer: VideoBuffer) -> Result<(), DriverError>;
    fn start_depth(&mut self) -> Result<(), DriverError>;
    fn start_video(&mut self) -> Result<(), DriverError>;
    fn stop_depth(&mut self) -> Result<(), DriverError>;
    fn stop_video(&mut self) -> Result<(), DriverError>;
    /// Process control-channel state; returns the latest tilt reading
    fn update_tilt_state(&mut self) -> Result<TiltState, DriverError>;
    fn close(&mut self);
}
