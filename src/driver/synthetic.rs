//! Test-pattern driver
//!
//! Behaves like a sensor driver from the pipeline's point of view: frames are
//! produced on one thread per stream at a fixed rate and delivered through
//! the registered callbacks. Video frames are written into whichever buffer
//! the application last registered.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, trace, warn};

use super::{
    DepthCallback, Device, Driver, DriverContext, DriverError, LedState, LogLevel, Subdevices,
    TiltState, VideoBufferRegistrar, VideoCallback,
};
use crate::capture::frame::{ElementType, FrameMode};
use crate::capture::pool::VideoBuffer;

const MAX_TILT_DEGS: f64 = 31.0;
const MAX_DEPTH_SAMPLE: u16 = 2047;

/// Driver producing moving gradients instead of sensor data
#[derive(Debug, Clone)]
pub struct SyntheticDriver {
    devices: usize,
    frame_interval: Duration,
}

impl SyntheticDriver {
    pub fn new(devices: usize, frame_rate: u32) -> Self {
        Self {
            devices,
            frame_interval: Duration::from_secs(1) / frame_rate.max(1),
        }
    }
}

impl Driver for SyntheticDriver {
    fn open_context(&self) -> Result<Box<dyn DriverContext>, DriverError> {
        Ok(Box::new(SyntheticContext {
            devices: self.devices,
            frame_interval: self.frame_interval,
            subdevices: Subdevices {
                motor: true,
                camera: true,
            },
        }))
    }
}

struct SyntheticContext {
    devices: usize,
    frame_interval: Duration,
    subdevices: Subdevices,
}

impl DriverContext for SyntheticContext {
    fn set_log_level(&mut self, level: LogLevel) {
        debug!(?level, "synthetic driver log level set");
    }

    fn select_subdevices(&mut self, subdevices: Subdevices) {
        self.subdevices = subdevices;
    }

    fn num_devices(&mut self) -> Result<usize, DriverError> {
        Ok(self.devices)
    }

    fn open_device(&mut self, index: usize) -> Result<Box<dyn Device>, DriverError> {
        if index >= self.devices {
            return Err(DriverError::NoSuchDevice {
                index,
                available: self.devices,
            });
        }
        if !self.subdevices.camera {
            return Err(DriverError::Stream {
                stream: "camera",
                reason: "camera subdevice not selected".into(),
            });
        }
        info!(index, "synthetic device opened");
        Ok(Box::new(SyntheticDevice::new(self.frame_interval)))
    }

    fn shutdown(&mut self) {
        debug!("synthetic driver context shut down");
    }
}

type PendingBuffer = Arc<Mutex<Option<VideoBuffer>>>;

struct PendingSlot(PendingBuffer);

impl VideoBufferRegistrar for PendingSlot {
    fn set_video_buffer(&mut self, buffer: VideoBuffer) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(buffer);
    }
}

/// A producer thread stopped by dropping its channel
struct StreamThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn spawn(
        name: &str,
        interval: Duration,
        mut produce: impl FnMut(u64, u32) + Send + 'static,
    ) -> Result<Self, DriverError> {
        let (stop, stopped): (Sender<()>, Receiver<()>) = flume::bounded(0);
        let tick = interval.as_micros() as u32;
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let mut frame = 0u64;
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    produce(frame, (frame as u32).wrapping_mul(tick));
                    frame += 1;
                }
            })
            .map_err(|e| DriverError::Stream {
                stream: "capture",
                reason: e.to_string(),
            })?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            warn!("synthetic stream thread panicked");
        }
    }
}

pub struct SyntheticDevice {
    frame_interval: Duration,
    depth_mode: Option<FrameMode>,
    video_mode: Option<FrameMode>,
    depth_callback: Option<DepthCallback>,
    video_callback: Option<VideoCallback>,
    pending: PendingBuffer,
    depth: Option<StreamThread>,
    video: Option<StreamThread>,
    tilt: TiltState,
    closed: bool,
}

impl SyntheticDevice {
    fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval,
            depth_mode: None,
            video_mode: None,
            depth_callback: None,
            video_callback: None,
            pending: Arc::new(Mutex::new(None)),
            depth: None,
            video: None,
            tilt: TiltState {
                angle_degs: 0.0,
                accel: [0.0, -9.81, 0.0],
            },
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        Ok(())
    }
}

fn not_ready(stream: &'static str, reason: &str) -> DriverError {
    DriverError::Stream {
        stream,
        reason: reason.to_owned(),
    }
}

impl Device for SyntheticDevice {
    fn set_tilt_degs(&mut self, angle: f64) -> Result<(), DriverError> {
        self.ensure_open()?;
        if !(-MAX_TILT_DEGS..=MAX_TILT_DEGS).contains(&angle) {
            return Err(DriverError::TiltOutOfRange(angle));
        }
        self.tilt.angle_degs = angle;
        Ok(())
    }

    fn set_led(&mut self, led: LedState) -> Result<(), DriverError> {
        self.ensure_open()?;
        debug!(?led, "synthetic led set");
        Ok(())
    }

    fn set_depth_mode(&mut self, mode: FrameMode) -> Result<(), DriverError> {
        self.ensure_open()?;
        if mode.element != ElementType::Depth16S || mode.width > 640 || mode.height > 480 {
            return Err(DriverError::UnsupportedMode(mode));
        }
        self.depth_mode = Some(mode);
        Ok(())
    }

    fn set_video_mode(&mut self, mode: FrameMode) -> Result<(), DriverError> {
        self.ensure_open()?;
        if mode.element != ElementType::Rgb8 {
            return Err(DriverError::UnsupportedMode(mode));
        }
        self.video_mode = Some(mode);
        Ok(())
    }

    fn set_depth_callback(&mut self, callback: DepthCallback) {
        self.depth_callback = Some(callback);
    }

    fn set_video_callback(&mut self, callback: VideoCallback) {
        self.video_callback = Some(callback);
    }

    fn set_video_buffer(&mut self, buffer: VideoBuffer) -> Result<(), DriverError> {
        self.ensure_open()?;
        PendingSlot(self.pending.clone()).set_video_buffer(buffer);
        Ok(())
    }

    fn start_depth(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        if self.depth.is_some() {
            return Err(not_ready("depth", "already streaming"));
        }
        let mode = self.depth_mode.ok_or_else(|| not_ready("depth", "no mode set"))?;
        let callback = self
            .depth_callback
            .clone()
            .ok_or_else(|| not_ready("depth", "no callback registered"))?;

        let (width, height) = (mode.width as usize, mode.height as usize);
        let mut samples = vec![0u16; mode.pixels()];
        self.depth = Some(StreamThread::spawn(
            "synthetic-depth",
            self.frame_interval,
            move |frame, timestamp| {
                let shift = frame as usize * 8;
                for y in 0..height {
                    for x in 0..width {
                        samples[y * width + x] =
                            ((x + y + shift) % (MAX_DEPTH_SAMPLE as usize + 1)) as u16;
                    }
                }
                callback(&samples, timestamp);
            },
        )?);
        Ok(())
    }

    fn start_video(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        if self.video.is_some() {
            return Err(not_ready("video", "already streaming"));
        }
        let mode = self.video_mode.ok_or_else(|| not_ready("video", "no mode set"))?;
        let callback = self
            .video_callback
            .clone()
            .ok_or_else(|| not_ready("video", "no callback registered"))?;

        let pending = self.pending.clone();
        let width = mode.width as usize;
        self.video = Some(StreamThread::spawn(
            "synthetic-video",
            self.frame_interval,
            move |frame, timestamp| {
                let taken = pending.lock().unwrap_or_else(PoisonError::into_inner).take();
                let Some(mut buffer) = taken else {
                    trace!(frame, "no video buffer registered, frame skipped");
                    return;
                };
                for (i, px) in buffer.as_mut_slice().chunks_exact_mut(3).enumerate() {
                    let (x, y) = (i % width, i / width);
                    px[0] = (x as u64 + frame) as u8;
                    px[1] = (y as u64 + frame) as u8;
                    px[2] = frame as u8;
                }
                callback(buffer, timestamp, &mut PendingSlot(pending.clone()));
            },
        )?);
        Ok(())
    }

    fn stop_depth(&mut self) -> Result<(), DriverError> {
        if let Some(stream) = self.depth.take() {
            stream.stop();
        }
        Ok(())
    }

    fn stop_video(&mut self) -> Result<(), DriverError> {
        if let Some(stream) = self.video.take() {
            stream.stop();
        }
        Ok(())
    }

    fn update_tilt_state(&mut self) -> Result<TiltState, DriverError> {
        self.ensure_open()?;
        Ok(self.tilt)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.stop_depth();
        let _ = self.stop_video();
        self.closed = true;
        debug!("synthetic device closed");
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.close();
    }
}
