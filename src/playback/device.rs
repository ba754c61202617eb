use super::engine::{ActiveClip, ClipToken, PlaybackEngine};
use crate::audio::{self, ResamplerState};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Plays clips on a cpal output device. The stream lives on a blocking
/// thread for the length of one clip; each clip gets its own stop token.
pub struct DevicePlayer {
    device_name: Option<String>,
    active: ActiveClip,
}

impl DevicePlayer {
    pub fn new(device_name: Option<&str>) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            active: ActiveClip::new(),
        }
    }
}

#[async_trait]
impl PlaybackEngine for DevicePlayer {
    fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or("default output")
    }

    async fn play(&self, clip: &Path) -> Result<()> {
        let token = self.active.begin().await;
        let path = clip.to_path_buf();
        let name = self.device_name.clone();
        tokio::task::spawn_blocking(move || play_blocking(&path, name.as_deref(), &token))
            .await
            .map_err(|e| SessionError::Playback(format!("output task failed: {}", e)))?
    }

    async fn stop(&self) {
        self.active.halt().await;
    }
}

fn open_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| SessionError::Playback(format!("Failed to list devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SessionError::Playback(format!("Device '{}' not found", name))),
        None => host
            .default_output_device()
            .ok_or_else(|| SessionError::Playback("No default output device".into())),
    }
}

fn play_blocking(path: &Path, device_name: Option<&str>, token: &ClipToken) -> Result<()> {
    let clip = audio::decode_wav(path)?;
    let device = open_device(device_name)?;
    let supported = device
        .default_output_config()
        .map_err(|e| SessionError::Playback(format!("No output config: {}", e)))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(SessionError::Playback(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        )));
    }
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels.max(1) as usize;
    let rate = config.sample_rate.0;

    let mut state = ResamplerState::default();
    let samples = Arc::new(audio::resample_linear(
        &clip.samples,
        clip.sample_rate,
        rate,
        &mut state,
    ));
    let total = samples.len();
    let cursor = Arc::new(AtomicUsize::new(0));

    let feed = samples.clone();
    let position = cursor.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let i = position.fetch_add(1, Ordering::Relaxed);
                    let s = feed.get(i).copied().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = s;
                    }
                }
            },
            |err| {
                log::warn!("[playback] output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SessionError::Playback(format!("Failed to build stream: {}", e)))?;
    stream
        .play()
        .map_err(|e| SessionError::Playback(format!("Failed to start stream: {}", e)))?;

    log::debug!(
        "[playback] device stream {}Hz {}ch, {} frames",
        rate,
        channels,
        total
    );
    while cursor.load(Ordering::Relaxed) < total {
        if token.is_stopped() {
            return Err(SessionError::Playback("stopped".into()));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    // Let the device drain its last buffer.
    std::thread::sleep(Duration::from_millis(50));
    Ok(())
}
