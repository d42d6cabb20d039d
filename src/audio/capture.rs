//! Audio capture using CPAL: device resolution and the bridge from
//! driver callbacks into the pipeline's frame queue.
//!
//! Capture callbacks run on driver-owned threads. The only operation they
//! perform against the rest of the system is a non-blocking enqueue of a
//! copied, fixed-size frame; a full queue drops the frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::AudioConfig;
use crate::defaults;
use crate::error::{ParleyError, Result};
use crate::pipeline::types::{AudioFrame, FrameSource};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses the ALSA/JACK/PipeWire noise CPAL triggers while probing
/// audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Resolve the capture host, preferring the configured low-latency host
/// API by name substring and falling back to the platform default.
fn resolve_host(api_name: Option<&str>) -> cpal::Host {
    if let Some(name) = api_name {
        let wanted = name.to_lowercase();
        for id in cpal::available_hosts() {
            if id.name().to_lowercase().contains(&wanted)
                && let Ok(host) = cpal::host_from_id(id)
            {
                return host;
            }
        }
        warn!("host API '{name}' not found, using the default host");
    }
    cpal::default_host()
}

/// Resolve an input device by case-insensitive name substring, or the
/// host's default input device when no name is given.
fn resolve_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        if let Some(substring) = name {
            let wanted = substring.to_lowercase();
            let devices = host
                .input_devices()
                .map_err(|e| ParleyError::AudioCapture {
                    message: format!("failed to enumerate input devices: {e}"),
                })?;

            for device in devices {
                if let Ok(device_name) = device.name()
                    && device_name.to_lowercase().contains(&wanted)
                {
                    return Ok(device);
                }
            }

            Err(ParleyError::DeviceNotFound {
                device: substring.to_string(),
            })
        } else {
            host.default_input_device()
                .ok_or_else(|| ParleyError::DeviceNotFound {
                    device: "default".to_string(),
                })
        }
    })
}

/// List input device names on the resolved host.
pub fn list_input_devices(api_name: Option<&str>) -> Result<Vec<String>> {
    let host = resolve_host(api_name);
    let devices = with_suppressed_stderr(|| host.input_devices()).map_err(|e| {
        ParleyError::AudioCapture {
            message: format!("failed to enumerate input devices: {e}"),
        }
    })?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Accumulates callback samples and emits fixed 960-sample frames.
struct FrameAssembler {
    pending: Vec<i16>,
}

impl FrameAssembler {
    fn new() -> Self {
        Self {
            pending: Vec::with_capacity(defaults::FRAME_SAMPLES * 2),
        }
    }

    fn push<F: FnMut(Vec<i16>)>(&mut self, samples: &[i16], mut emit: F) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= defaults::FRAME_SAMPLES {
            let frame: Vec<i16> = self.pending.drain(..defaults::FRAME_SAMPLES).collect();
            emit(frame);
        }
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched while holding the streams mutex in
/// `AudioCapture`; its methods never cross thread boundaries unsafely.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Live audio capture feeding the pipeline's frame queue.
///
/// Opens the required loopback stream and, when one resolves, an optional
/// microphone stream. Streams are stopped and closed on every exit path:
/// `stop()` is explicit and `Drop` repeats it.
pub struct AudioCapture {
    config: AudioConfig,
    frames: mpsc::Sender<AudioFrame>,
    streams: Mutex<Vec<SendableStream>>,
    dropped: Arc<AtomicU64>,
}

impl AudioCapture {
    pub fn new(config: AudioConfig, frames: mpsc::Sender<AudioFrame>) -> Self {
        Self {
            config,
            frames,
            streams: Mutex::new(Vec::new()),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open and start the capture streams.
    ///
    /// A missing loopback device is fatal; a missing microphone degrades
    /// to loopback-only capture with a warning.
    pub fn start(&self) -> Result<()> {
        let host = resolve_host(self.config.host_api.as_deref());

        let loopback = resolve_input_device(&host, self.config.loopback_device.as_deref())?;
        info!(
            "using loopback device '{}'",
            loopback.name().unwrap_or_default()
        );

        let mut streams = vec![self.build_stream(&loopback, FrameSource::Loopback)?];

        if let Some(mic_name) = self.config.mic_device.as_deref() {
            match resolve_input_device(&host, Some(mic_name)) {
                Ok(mic) => {
                    info!("using microphone device '{}'", mic.name().unwrap_or_default());
                    streams.push(self.build_stream(&mic, FrameSource::Microphone)?);
                }
                Err(e) => {
                    warn!("microphone unavailable ({e}), continuing with loopback only");
                }
            }
        }

        for stream in &streams {
            stream.0.play().map_err(|e| ParleyError::AudioCapture {
                message: format!("failed to start audio stream: {e}"),
            })?;
        }

        if let Ok(mut guard) = self.streams.lock() {
            *guard = streams;
        }
        Ok(())
    }

    /// Stop and close all capture streams. Idempotent.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.streams.lock() {
            for stream in guard.drain(..) {
                if let Err(e) = stream.0.pause() {
                    warn!("failed to stop audio stream: {e}");
                }
            }
        }
    }

    /// Build a 48 kHz mono input stream for one device.
    ///
    /// Tries i16 first; falls back to f32 with clamp-and-scale conversion
    /// for devices that only expose float formats.
    fn build_stream(&self, device: &cpal::Device, source: FrameSource) -> Result<SendableStream> {
        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.config.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = move |err| {
            error!("audio stream error on {source:?}: {err}");
        };

        // i16 path: no conversion needed.
        {
            let mut assembler = FrameAssembler::new();
            let frames = self.frames.clone();
            let dropped = Arc::clone(&self.dropped);
            if let Ok(stream) = device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, |samples| {
                        enqueue_frame(&frames, &dropped, AudioFrame::new(source, samples));
                    });
                },
                err_callback,
                None,
            ) {
                return Ok(SendableStream(stream));
            }
        }

        // f32 fallback.
        let mut assembler = FrameAssembler::new();
        let frames = self.frames.clone();
        let dropped = Arc::clone(&self.dropped);
        device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    assembler.push(&converted, |samples| {
                        enqueue_frame(&frames, &dropped, AudioFrame::new(source, samples));
                    });
                },
                err_callback,
                None,
            )
            .map(SendableStream)
            .map_err(|e| ParleyError::AudioCapture {
                message: format!("failed to build input stream: {e}"),
            })
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Non-blocking enqueue from the driver thread: a full queue drops the
/// frame and counts it, never blocks the callback.
fn enqueue_frame(
    frames: &mpsc::Sender<AudioFrame>,
    dropped: &AtomicU64,
    frame: AudioFrame,
) {
    if frames.try_send(frame).is_err() {
        let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 100 == 1 {
            warn!("audio queue full, {total} frames dropped so far");
        }
    }
}
