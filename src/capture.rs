//! Microphone capture for push-to-talk turns. Recording runs on its own
//! thread (the cpal stream is not `Send`); stopping hands back a 16-bit mono
//! WAV ready for `send_captured_audio`.

use crate::error::Result;

/// An active recording. Dropping it discards the audio.
pub struct CaptureHandle {
    inner: imp::Recorder,
}

impl CaptureHandle {
    /// Acquire the input device and start recording. `device_name` of `None`
    /// uses the host default.
    pub async fn start(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let inner = imp::Recorder::start(device_name, sample_rate).await?;
        Ok(Self { inner })
    }

    pub async fn finish(self) -> Result<Vec<u8>> {
        self.inner.finish().await
    }
}

#[cfg(feature = "audio-io")]
mod imp {
    use crate::audio::{self, ResamplerState};
    use crate::error::{Result, SessionError};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, StreamConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    pub struct Recorder {
        stop: Arc<AtomicBool>,
        done: Option<oneshot::Receiver<Result<Vec<u8>>>>,
    }

    impl Recorder {
        pub async fn start(device_name: Option<&str>, target_rate: u32) -> Result<Self> {
            let stop = Arc::new(AtomicBool::new(false));
            let (ready_tx, ready_rx) = oneshot::channel();
            let (done_tx, done_rx) = oneshot::channel();
            let name = device_name.map(str::to_string);
            let thread_stop = stop.clone();
            std::thread::Builder::new()
                .name("voicelink-capture".into())
                .spawn(move || record(name, target_rate, thread_stop, ready_tx, done_tx))
                .map_err(|e| SessionError::Capture(format!("Failed to start capture: {}", e)))?;

            match ready_rx.await {
                Ok(Ok(())) => Ok(Self {
                    stop,
                    done: Some(done_rx),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(SessionError::Capture("capture thread exited".into())),
            }
        }

        pub async fn finish(mut self) -> Result<Vec<u8>> {
            self.stop.store(true, Ordering::SeqCst);
            match self.done.take() {
                Some(done) => done
                    .await
                    .map_err(|_| SessionError::Capture("capture thread exited".into()))?,
                None => Err(SessionError::Capture("capture already finished".into())),
            }
        }
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn record(
        device_name: Option<String>,
        target_rate: u32,
        stop: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<()>>,
        done: oneshot::Sender<Result<Vec<u8>>>,
    ) {
        let (raw_tx, raw_rx) = sync_channel::<Vec<f32>>(128);
        let (stream, input_rate) = match open_stream(device_name.as_deref(), target_rate, raw_tx) {
            Ok(opened) => opened,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        let mut samples: Vec<f32> = Vec::new();
        while !stop.load(Ordering::SeqCst) {
            match raw_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(chunk) => samples.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(stream);
        drain(&raw_rx, &mut samples);

        let mut state = ResamplerState::default();
        let resampled = audio::resample_linear(&samples, input_rate, target_rate, &mut state);
        log::info!(
            "[capture] stopped, {}ms of audio",
            resampled.len() as u64 * 1000 / target_rate.max(1) as u64
        );
        let _ = done.send(audio::encode_wav(&resampled, target_rate));
    }

    fn drain(rx: &Receiver<Vec<f32>>, samples: &mut Vec<f32>) {
        while let Ok(chunk) = rx.try_recv() {
            samples.extend_from_slice(&chunk);
        }
    }

    fn open_stream(
        device_name: Option<&str>,
        target_rate: u32,
        raw_tx: SyncSender<Vec<f32>>,
    ) -> Result<(cpal::Stream, u32)> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| SessionError::Capture(format!("Failed to list devices: {}", e)))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| SessionError::Capture(format!("Device '{}' not found", name)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| SessionError::Capture("No default input device".into()))?,
        };
        log::info!(
            "[capture] using device: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let config = match try_config(&device, target_rate) {
            Some(cfg) => cfg,
            None => {
                let default = device
                    .default_input_config()
                    .map_err(|e| SessionError::Capture(format!("No input config: {}", e)))?;
                log::info!(
                    "[capture] {}Hz unavailable, using default {}Hz {}ch",
                    target_rate,
                    default.sample_rate().0,
                    default.channels()
                );
                default.config()
            }
        };

        let channels = config.channels.max(1) as usize;
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = if channels > 1 {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    } else {
                        data.to_vec()
                    };
                    let _ = raw_tx.try_send(mono);
                },
                |err| {
                    log::warn!("[capture] stream error: {}", err);
                },
                None,
            )
            .map_err(|e| SessionError::Capture(format!("Failed to build stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| SessionError::Capture(format!("Failed to start stream: {}", e)))?;
        Ok((stream, config.sample_rate.0))
    }

    fn try_config(device: &cpal::Device, rate: u32) -> Option<StreamConfig> {
        let mut fallback = None;
        for range in device.supported_input_configs().ok()? {
            if range.min_sample_rate().0 > rate || range.max_sample_rate().0 < rate {
                continue;
            }
            let config = StreamConfig {
                channels: range.channels(),
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            if range.channels() == 1 {
                return Some(config);
            }
            // Stereo works too; we downmix.
            fallback.get_or_insert(config);
        }
        fallback
    }
}

#[cfg(not(feature = "audio-io"))]
mod imp {
    use crate::error::{Result, SessionError};
    use std::convert::Infallible;

    pub struct Recorder(Infallible);

    impl Recorder {
        pub async fn start(_device_name: Option<&str>, _target_rate: u32) -> Result<Self> {
            Err(SessionError::Capture(
                "audio capture is not available in this build (enable the audio-io feature)"
                    .into(),
            ))
        }

        pub async fn finish(self) -> Result<Vec<u8>> {
            match self.0 {}
        }
    }
}

#[cfg(all(test, not(feature = "audio-io")))]
mod tests {
    use super::*;
    use crate::error::SessionError;

    #[tokio::test]
    async fn capture_without_device_support_is_a_capture_error() {
        let err = CaptureHandle::start(None, 16000).await.err().unwrap();
        assert!(matches!(err, SessionError::Capture(_)));
        assert!(err.is_surfaced());
    }
}
