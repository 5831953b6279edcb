//! Frame callbacks: buffer hand-off, encoding and publishing
//!
//! Both entry points run on driver threads. Each takes the dispatcher lock for
//! the whole swap + encode + publish sequence; frames are never queued, so a
//! slow publish only delays the next frame of that stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use thiserror::Error;
use tracing::{error, trace, warn};

use crate::capture::frame::{ElementType, FrameMeta, FrameMode};
use crate::capture::pool::{BufferIdentity, FrameArena, SlotRole, VideoBuffer};
use crate::driver::VideoBufferRegistrar;
use crate::pipeline::convert::{rgb_to_gray, GammaTable};
use crate::pipeline::publisher::{PublishError, Publisher};
use crate::pipeline::record::{RecordEncoder, RecordError};

/// The driver broke the buffer hand-off protocol
#[derive(Debug, Error)]
#[error("video buffer contract violated: {0}")]
pub struct ContractViolation(#[from] pub BufferIdentity);

/// Why a frame did not reach its sink
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("encode failed: {0}")]
    Encode(#[from] RecordError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Depth,
    Color,
    /// Gamma-mapped depth
    Intensity,
}

impl Stream {
    pub fn name(self) -> &'static str {
        match self {
            Stream::Depth => "depth",
            Stream::Color => "color",
            Stream::Intensity => "intensity",
        }
    }
}

/// Where and how each stream is published
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub depth_mode: FrameMode,
    pub color_mode: FrameMode,
    pub depth_sink: Publisher,
    pub color_sink: Publisher,
    /// Gamma-mapped depth, published as 16-bit unsigned
    pub intensity_sink: Option<Publisher>,
    /// Publish color as averaged single-channel gray instead of raw RGB
    pub grayscale: bool,
}

#[derive(Default)]
struct StreamStats {
    frames: AtomicU64,
    published: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

/// Counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub published: u64,
    pub failures: u64,
    pub skipped: u64,
}

impl StreamStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

struct Output {
    mode: FrameMode,
    encoder: RecordEncoder,
    sink: Publisher,
}

struct DispatchState {
    depth_pool: FrameArena,
    color_pool: FrameArena,
    depth: Output,
    color: Output,
    intensity: Option<Output>,
    gray: Option<Vec<u8>>,
}

pub struct CaptureDispatcher {
    depth_mode: FrameMode,
    color_mode: FrameMode,
    gamma: Arc<GammaTable>,
    state: Mutex<DispatchState>,
    depth_stats: CachePadded<StreamStats>,
    color_stats: CachePadded<StreamStats>,
    intensity_stats: CachePadded<StreamStats>,
}

impl CaptureDispatcher {
    pub fn new(config: DispatchConfig, gamma: Arc<GammaTable>) -> Self {
        let depth_mode = config.depth_mode;
        let color_mode = config.color_mode;
        let published_color = if config.grayscale {
            color_mode.with_element(ElementType::Gray8)
        } else {
            color_mode
        };
        let intensity_mode = depth_mode.with_element(ElementType::Depth16U);

        let output = |mode: FrameMode, sink: Publisher| Output {
            mode,
            encoder: RecordEncoder::for_mode(&mode),
            sink,
        };

        let state = DispatchState {
            depth_pool: FrameArena::new(intensity_mode.payload_len()),
            color_pool: FrameArena::new(color_mode.payload_len()),
            depth: output(depth_mode, config.depth_sink),
            color: output(published_color, config.color_sink),
            intensity: config
                .intensity_sink
                .map(|sink| output(intensity_mode, sink)),
            gray: config
                .grayscale
                .then(|| vec![0u8; published_color.payload_len()]),
        };

        Self {
            depth_mode,
            color_mode,
            gamma,
            state: Mutex::new(state),
            depth_stats: CachePadded::new(StreamStats::default()),
            color_stats: CachePadded::new(StreamStats::default()),
            intensity_stats: CachePadded::new(StreamStats::default()),
        }
    }

    pub fn depth_mode(&self) -> FrameMode {
        self.depth_mode
    }

    pub fn color_mode(&self) -> FrameMode {
        self.color_mode
    }

    pub fn stats(&self, stream: Stream) -> StatsSnapshot {
        self.stats_for(stream).snapshot()
    }

    fn stats_for(&self, stream: Stream) -> &StreamStats {
        match stream {
            Stream::Depth => &self.depth_stats,
            Stream::Color => &self.color_stats,
            Stream::Intensity => &self.intensity_stats,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DispatchState> {
        // A panic mid-publish leaves only a stale record behind.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lend the initial color back buffer for registration with the driver
    pub fn initial_video_buffer(&self) -> Option<VideoBuffer> {
        self.lock().color_pool.lend_back()
    }

    /// Depth frame callback. `samples` is driver-owned and only read here.
    pub fn on_depth(&self, samples: &[u16], timestamp: u32) {
        let sequence = self.depth_stats.frames.fetch_add(1, Ordering::Relaxed);
        let meta = FrameMeta {
            mode: self.depth_mode,
            timestamp,
            sequence,
        };
        if samples.len() != meta.mode.pixels() {
            warn!(
                got = samples.len(),
                expected = meta.mode.pixels(),
                "depth frame has wrong sample count, skipped"
            );
            self.depth_stats.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut guard = self.lock();
        let state = &mut *guard;

        let depth = &mut state.depth;
        let outcome = depth
            .encoder
            .encode_samples(&depth.mode, samples)
            .map_err(DispatchError::from)
            .and_then(|record| publish(&depth.sink, record, Stream::Depth));
        self.record_outcome(Stream::Depth, &meta, outcome);

        if let Some(intensity) = state.intensity.as_mut() {
            self.intensity_stats.frames.fetch_add(1, Ordering::Relaxed);
            let Some(staging) = state.depth_pool.get_mut(SlotRole::Mid) else {
                return;
            };
            self.gamma.map_into(samples, staging);
            let outcome = intensity
                .encoder
                .encode(&intensity.mode, staging)
                .map_err(DispatchError::from)
                .and_then(|record| publish(&intensity.sink, record, Stream::Intensity));
            self.record_outcome(Stream::Intensity, &meta, outcome);
        }
    }

    /// Video frame callback.
    ///
    /// The filled buffer must be the back buffer previously lent out. The old
    /// mid buffer is handed to `registrar` before any encoding starts.
    pub fn on_video(
        &self,
        filled: VideoBuffer,
        timestamp: u32,
        registrar: &mut dyn VideoBufferRegistrar,
    ) -> Result<(), ContractViolation> {
        let sequence = self.color_stats.frames.fetch_add(1, Ordering::Relaxed);
        let meta = FrameMeta {
            mode: self.color_mode,
            timestamp,
            sequence,
        };

        let mut guard = self.lock();
        let state = &mut *guard;

        let next = state.color_pool.rotate(filled)?;
        registrar.set_video_buffer(next);

        let Some(rgb) = state.color_pool.get(SlotRole::Mid) else {
            return Err(BufferIdentity::NotLent(state.color_pool.slot_of(SlotRole::Mid)).into());
        };
        let payload: &[u8] = match state.gray.as_mut() {
            Some(gray) => {
                rgb_to_gray(rgb, gray);
                &gray[..]
            }
            None => rgb,
        };

        let color = &mut state.color;
        let outcome = color
            .encoder
            .encode(&color.mode, payload)
            .map_err(DispatchError::from)
            .and_then(|record| publish(&color.sink, record, Stream::Color));
        self.record_outcome(Stream::Color, &meta, outcome);
        Ok(())
    }

    fn record_outcome(
        &self,
        stream: Stream,
        meta: &FrameMeta,
        outcome: Result<(), DispatchError>,
    ) {
        let stats = self.stats_for(stream);
        match outcome {
            Ok(()) => {
                stats.published.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_published", "stream" => stream.name()).increment(1);
                trace!(
                    stream = stream.name(),
                    sequence = meta.sequence,
                    timestamp = meta.timestamp,
                    "frame published"
                );
            }
            Err(e) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("publish_failures", "stream" => stream.name()).increment(1);
                error!(
                    stream = stream.name(),
                    sequence = meta.sequence,
                    error = %e,
                    "publish failed, frame dropped"
                );
            }
        }
    }
}

fn publish(sink: &Publisher, record: &[u8], stream: Stream) -> Result<(), DispatchError> {
    let started = Instant::now();
    sink.publish(record)?;
    metrics::histogram!("publish_time_us", "stream" => stream.name())
        .record(started.elapsed().as_micros() as f64);
    Ok(())
}
