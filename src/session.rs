//! Device session lifecycle
//!
//! `DEVICE_OPEN -> STREAMING -> STOPPED`, with `FAILED` reached when startup
//! is rejected. Context setup happens inside `Session::init`, so a session
//! value only exists once its device is open. Driver handles live in
//! `Option`s that teardown takes, so each is released exactly once.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::capture::dispatcher::CaptureDispatcher;
use crate::capture::frame::ModeError;
use crate::capture::pool::VideoBuffer;
use crate::driver::{
    Device, Driver, DriverContext, DriverError, LedState, Subdevices, TiltState,
    VideoBufferRegistrar,
};
use crate::pipeline::convert::GammaTable;
use crate::{Config, DeviceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    DeviceOpen,
    Streaming,
    Stopped,
    Failed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid stream configuration: {0}")]
    Mode(#[from] ModeError),
    #[error("no devices found")]
    NoDevices,
    #[error("startup failed at {step}: {source}")]
    Startup {
        step: &'static str,
        source: DriverError,
    },
    #[error("color buffer already registered with the driver")]
    BufferLent,
    #[error("cannot {action} a session in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
}

fn startup(step: &'static str) -> impl FnOnce(DriverError) -> SessionError {
    move |source| SessionError::Startup { step, source }
}

pub struct Session {
    device_config: DeviceConfig,
    state: SessionState,
    context: Option<Box<dyn DriverContext>>,
    device: Option<Box<dyn Device>>,
    dispatcher: Arc<CaptureDispatcher>,
    depth_started: bool,
    video_started: bool,
}

impl Session {
    /// Validate configuration, build the pipeline and open the device.
    ///
    /// Fails fast when no device is present or the open call is rejected;
    /// the driver context is shut down before the error is returned.
    #[instrument(skip_all)]
    pub fn init(driver: &dyn Driver, config: &Config) -> Result<Self, SessionError> {
        let dispatch = config.dispatch_config()?;
        let gamma = Arc::new(GammaTable::new());
        let dispatcher = Arc::new(CaptureDispatcher::new(dispatch, gamma));

        let mut context = driver.open_context().map_err(startup("context init"))?;
        debug!("driver context open");
        context.set_log_level(config.device.log_level);
        context.select_subdevices(Subdevices {
            motor: true,
            camera: true,
        });

        let opened = context
            .num_devices()
            .map_err(startup("device enumeration"))
            .and_then(|count| {
                info!(count, "Number of devices found");
                if count < 1 {
                    return Err(SessionError::NoDevices);
                }
                context
                    .open_device(config.device.index)
                    .map_err(startup("device open"))
            });
        let device = match opened {
            Ok(device) => device,
            Err(e) => {
                context.shutdown();
                return Err(e);
            }
        };
        info!(index = config.device.index, "device open");

        Ok(Self {
            device_config: config.device.clone(),
            state: SessionState::DeviceOpen,
            context: Some(context),
            device: Some(device),
            dispatcher,
            depth_started: false,
            video_started: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn dispatcher(&self) -> &Arc<CaptureDispatcher> {
        &self.dispatcher
    }

    /// Configure the device, register callbacks and start both streams.
    ///
    /// Any rejection tears down what was started and leaves the session
    /// `Failed`.
    #[instrument(skip_all)]
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::DeviceOpen {
            return Err(SessionError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        match self.configure_and_start() {
            Ok(()) => {
                self.state = SessionState::Streaming;
                info!(
                    depth = ?self.dispatcher.depth_mode(),
                    color = ?self.dispatcher.color_mode(),
                    "streaming"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "startup rejected");
                self.teardown();
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn configure_and_start(&mut self) -> Result<(), SessionError> {
        let device = self.device.as_mut().ok_or(SessionError::InvalidState {
            action: "configure",
            state: self.state,
        })?;

        device
            .set_tilt_degs(self.device_config.tilt_degrees)
            .map_err(startup("tilt"))?;
        device
            .set_led(self.device_config.led)
            .map_err(startup("led"))?;

        let dispatcher = self.dispatcher.clone();
        device.set_depth_callback(Arc::new(move |samples: &[u16], timestamp: u32| {
            dispatcher.on_depth(samples, timestamp)
        }));
        let dispatcher = self.dispatcher.clone();
        device.set_video_callback(Arc::new(
            move |filled: VideoBuffer, timestamp: u32, registrar: &mut dyn VideoBufferRegistrar| {
                if let Err(violation) = dispatcher.on_video(filled, timestamp, registrar) {
                    // Continuing would alias driver and application ownership.
                    error!(%violation, "aborting");
                    std::process::abort();
                }
            },
        ));

        device
            .set_video_mode(self.dispatcher.color_mode())
            .map_err(startup("video mode"))?;
        device
            .set_depth_mode(self.dispatcher.depth_mode())
            .map_err(startup("depth mode"))?;

        let initial = self
            .dispatcher
            .initial_video_buffer()
            .ok_or(SessionError::BufferLent)?;
        device
            .set_video_buffer(initial)
            .map_err(startup("video buffer"))?;

        device.start_depth().map_err(startup("depth start"))?;
        self.depth_started = true;
        device.start_video().map_err(startup("video start"))?;
        self.video_started = true;
        Ok(())
    }

    /// Driver housekeeping for the owning thread. Errors are logged, not retried.
    pub fn housekeeping(&mut self) -> Option<TiltState> {
        let device = self.device.as_mut()?;
        match device.update_tilt_state() {
            Ok(tilt) => {
                trace!(angle = tilt.angle_degs, accel = ?tilt.accel, "tilt state");
                Some(tilt)
            }
            Err(e) => {
                warn!(error = %e, "tilt state update failed");
                None
            }
        }
    }

    pub fn set_tilt(&mut self, angle: f64) {
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.set_tilt_degs(angle) {
                warn!(angle, error = %e, "tilt request rejected");
            }
        }
    }

    pub fn set_led(&mut self, led: LedState) {
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.set_led(led) {
                warn!(?led, error = %e, "led request rejected");
            }
        }
    }

    /// Stop streams, close the device and shut down the context.
    ///
    /// Safe to call any number of times; later calls do nothing.
    pub fn stop(&mut self) {
        if self.device.is_none() && self.context.is_none() {
            debug!(state = ?self.state, "session already stopped");
            return;
        }
        self.teardown();
        self.state = SessionState::Stopped;
        info!("session stopped");
    }

    fn teardown(&mut self) {
        if let Some(mut device) = self.device.take() {
            if std::mem::take(&mut self.depth_started) {
                if let Err(e) = device.stop_depth() {
                    warn!(error = %e, "depth stop failed");
                }
            }
            if std::mem::take(&mut self.video_started) {
                if let Err(e) = device.stop_video() {
                    warn!(error = %e, "video stop failed");
                }
            }
            device.close();
        }
        if let Some(mut context) = self.context.take() {
            context.shutdown();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
