use crate::audio;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Notify};

/// How long starting or stopping a clip waits for the previous one to exit.
const HALT_GRACE: Duration = Duration::from_secs(2);

/// The one playback device. `play` resolves when the clip has finished (or
/// failed); `stop` aborts whatever is playing and is safe to call when idle.
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    fn name(&self) -> &str;
    async fn play(&self, clip: &Path) -> Result<()>;
    async fn stop(&self);
}

/// Engine for hosts without an output device: validates the WAV and holds
/// the queue for the clip's real duration, so ordering and pacing match a
/// device.
#[derive(Default)]
pub struct HeadlessPlayer {
    stop: Notify,
}

impl HeadlessPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlaybackEngine for HeadlessPlayer {
    fn name(&self) -> &str {
        "headless"
    }

    async fn play(&self, clip: &Path) -> Result<()> {
        let path = clip.to_path_buf();
        let duration = tokio::task::spawn_blocking(move || audio::wav_duration(&path))
            .await
            .map_err(|e| crate::error::SessionError::Playback(format!("duration task failed: {}", e)))??;
        log::info!("[playback] headless clip {}ms", duration.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.stop.notified() => Err(crate::error::SessionError::Playback("stopped".into())),
        }
    }

    async fn stop(&self) {
        // Wakes a play in progress; stores nothing for the next one.
        self.stop.notify_waiters();
    }
}

/// Tracks the clip an engine's worker thread is playing, so a stop only ever
/// reaches that clip and a new clip never starts before the old one exits.
#[derive(Default)]
pub struct ActiveClip {
    slot: Mutex<Option<Running>>,
}

struct Running {
    stop: Arc<AtomicBool>,
    done: oneshot::Receiver<()>,
}

/// Held by the worker for the length of one clip. Dropping it tells the
/// engine the worker has exited.
pub struct ClipToken {
    stop: Arc<AtomicBool>,
    _done: oneshot::Sender<()>,
}

impl ClipToken {
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl ActiveClip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Halt any clip still running, then hand out a token for the next one.
    pub async fn begin(&self) -> ClipToken {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            halt_running(previous).await;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();
        *slot = Some(Running {
            stop: stop.clone(),
            done: done_rx,
        });
        ClipToken {
            stop,
            _done: done_tx,
        }
    }

    /// Stop the running clip and wait for its worker to let go.
    pub async fn halt(&self) {
        let running = self.slot.lock().await.take();
        if let Some(running) = running {
            halt_running(running).await;
        }
    }
}

async fn halt_running(running: Running) {
    running.stop.store(true, Ordering::SeqCst);
    if tokio::time::timeout(HALT_GRACE, running.done).await.is_err() {
        log::warn!(
            "[playback] output worker still busy after {}ms",
            HALT_GRACE.as_millis()
        );
    }
}
