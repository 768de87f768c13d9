//! Mikrofon-Capture über cpal
//!
//! Nur mit Feature `device-capture`. Kamerazugriff bietet dieses
//! Backend nicht an.

use super::acquisition::{MediaAccessDenied, MediaDevices, MediaError};
use super::tracks::{MediaSource, TrackKind};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sample Rate (48kHz, passend zu Opus)
pub const SAMPLE_RATE: u32 = 48000;

// cpal::Stream ist nicht Send; der Stream wird nur über den Mutex angefasst
struct StreamHandle(Stream);
unsafe impl Send for StreamHandle {}

// ============================================================================
// DEVICES
// ============================================================================

/// Standard-Eingabegerät des Systems
#[derive(Debug, Default)]
pub struct CpalDevices;

#[async_trait]
impl MediaDevices for CpalDevices {
    async fn open(&self, kind: TrackKind) -> Result<Arc<dyn MediaSource>, MediaAccessDenied> {
        match kind {
            TrackKind::Audio => Ok(Arc::new(Microphone::open()?)),
            TrackKind::Video => Err(MediaAccessDenied::NoDevice(TrackKind::Video)),
        }
    }
}

// ============================================================================
// MICROPHONE
// ============================================================================

pub struct Microphone {
    name: String,
    stream: Mutex<Option<StreamHandle>>,
    muted: Arc<AtomicBool>,
    input_level: Arc<Mutex<f32>>,
}

impl Microphone {
    pub fn open() -> Result<Self, MediaAccessDenied> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(MediaAccessDenied::NoDevice(TrackKind::Audio))?;
        let name = device.name().unwrap_or_else(|_| "default input".to_string());

        let configs = device
            .supported_input_configs()
            .map_err(|e| device_failure(e.to_string()))?;
        let config = select_best_config(configs.collect())?;

        tracing::info!(
            "Starting audio capture on {}: {} Hz, {} channels",
            name,
            config.sample_rate.0,
            config.channels
        );

        let muted = Arc::new(AtomicBool::new(false));
        let input_level = Arc::new(Mutex::new(0.0f32));
        let muted_cb = Arc::clone(&muted);
        let level_cb = Arc::clone(&input_level);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if muted_cb.load(Ordering::Relaxed) || data.is_empty() {
                        *level_cb.lock() = 0.0;
                        return;
                    }
                    let rms = (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt();
                    *level_cb.lock() = rms.min(1.0);
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    MediaAccessDenied::NoDevice(TrackKind::Audio)
                }
                other => device_failure(other.to_string()),
            })?;

        stream.play().map_err(|e| device_failure(e.to_string()))?;

        Ok(Self {
            name,
            stream: Mutex::new(Some(StreamHandle(stream))),
            muted,
            input_level,
        })
    }

    /// Eingangspegel (0.0 - 1.0)
    pub fn input_level(&self) -> f32 {
        *self.input_level.lock()
    }
}

impl MediaSource for Microphone {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn set_enabled(&self, enabled: bool) {
        self.muted.store(!enabled, Ordering::Relaxed);
        tracing::debug!("Microphone muted: {}", !enabled);
    }

    fn stop(&self) -> Result<(), MediaError> {
        let Some(StreamHandle(stream)) = self.stream.lock().take() else {
            return Ok(());
        };
        let paused = stream.pause();
        drop(stream);
        tracing::info!("Audio capture stopped");
        paused.map_err(|e| MediaError::StopFailed {
            kind: TrackKind::Audio,
            reason: e.to_string(),
        })
    }
}

fn device_failure(reason: String) -> MediaAccessDenied {
    MediaAccessDenied::DeviceFailure {
        kind: TrackKind::Audio,
        reason,
    }
}

/// 48kHz F32 bevorzugt, sonst die erste brauchbare Konfiguration
fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
) -> Result<StreamConfig, MediaAccessDenied> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);

    for config in &configs {
        if config.min_sample_rate() <= target_rate
            && config.max_sample_rate() >= target_rate
            && config.sample_format() == SampleFormat::F32
        {
            return Ok(config.with_sample_rate(target_rate).into());
        }
    }

    if let Some(config) = configs.iter().find(|c| c.sample_format() == SampleFormat::F32) {
        return Ok(config.with_max_sample_rate().into());
    }

    Err(device_failure(
        "No F32 input configuration available".to_string(),
    ))
}
