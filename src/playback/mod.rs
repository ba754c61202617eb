//! Ordered, exclusive playback of response clips.
//!
//! One consumer task takes clips in arrival order, writes each to a scratch
//! file, hands it to the engine and waits for it to finish before looking at
//! the queue again.

#[cfg(feature = "audio-io")]
pub mod device;
pub mod engine;
pub mod scratch;

#[cfg(feature = "audio-io")]
pub use device::DevicePlayer;
pub use engine::{HeadlessPlayer, PlaybackEngine};
pub use scratch::{ScratchDir, ScratchFile};

use crate::error::SessionError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

/// How long `clear()` waits for a cancelled clip to release its scratch file.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PendingAudioClip {
    pub id: u64,
    pub payload: Vec<u8>,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub playing: bool,
}

impl QueueSnapshot {
    /// Pending clips plus the one in flight.
    pub fn len(&self) -> usize {
        self.pending + usize::from(self.playing)
    }

    pub fn is_idle(&self) -> bool {
        self.len() == 0
    }
}

struct InFlight {
    id: u64,
    cancel: Arc<Notify>,
    released: Option<oneshot::Receiver<()>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingAudioClip>,
    in_flight: Option<InFlight>,
    generation: u64,
    next_id: u64,
}

impl QueueState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.pending.len(),
            playing: self.in_flight.is_some(),
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    engine: Arc<dyn PlaybackEngine>,
    scratch: ScratchDir,
    timeout: Duration,
    snapshot: watch::Sender<QueueSnapshot>,
}

/// Work handed to the consumer for one clip.
struct Job {
    clip: PendingAudioClip,
    generation: u64,
    cancel: Arc<Notify>,
    released: oneshot::Sender<()>,
}

enum Outcome {
    Finished,
    Failed(SessionError),
    TimedOut,
    Cancelled,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &QueueState) {
        let snap = state.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snap {
                false
            } else {
                *current = snap;
                true
            }
        });
    }

    fn take_next(&self) -> Option<Job> {
        let mut state = self.lock();
        if state.in_flight.is_some() {
            return None;
        }
        let clip = state.pending.pop_front()?;
        let cancel = Arc::new(Notify::new());
        let (released_tx, released_rx) = oneshot::channel();
        state.in_flight = Some(InFlight {
            id: clip.id,
            cancel: cancel.clone(),
            released: Some(released_rx),
        });
        let generation = state.generation;
        self.publish(&state);
        Some(Job {
            clip,
            generation,
            cancel,
            released: released_tx,
        })
    }

    /// Mark a clip done. A completion from a generation that `clear()` has
    /// since retired changes nothing.
    fn finish(&self, id: u64, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            log::debug!("[playback] ignoring completion of cleared clip {}", id);
            return;
        }
        if state.in_flight.as_ref().map(|f| f.id) == Some(id) {
            state.in_flight = None;
            self.publish(&state);
        }
    }

    async fn play_one(&self, clip: &PendingAudioClip, cancel: &Notify) {
        let file = match self.scratch.write(clip.id, &clip.payload).await {
            Ok(file) => file,
            Err(e) => {
                log::warn!("[playback] clip {} dropped: {}", clip.id, e);
                return;
            }
        };
        log::info!(
            "[playback] playing clip {} ({} bytes, queued {}ms) on {}",
            clip.id,
            clip.payload.len(),
            clip.enqueued_at.elapsed().as_millis(),
            self.engine.name()
        );

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.timeout, self.engine.play(file.path())) => {
                match result {
                    Ok(Ok(())) => Outcome::Finished,
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(_) => Outcome::TimedOut,
                }
            }
            _ = cancel.notified() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Finished) {
            self.engine.stop().await;
        }
        file.release().await;

        match outcome {
            Outcome::Finished => log::info!("[playback] clip {} finished", clip.id),
            Outcome::Failed(e) => log::warn!("[playback] clip {} dropped: {}", clip.id, e),
            Outcome::TimedOut => log::warn!(
                "[playback] clip {} dropped: {}",
                clip.id,
                SessionError::Playback(format!(
                    "no completion after {}ms",
                    self.timeout.as_millis()
                ))
            ),
            Outcome::Cancelled => log::info!("[playback] clip {} cancelled", clip.id),
        }
    }
}

async fn run_consumer(shared: Arc<Shared>) {
    loop {
        match shared.take_next() {
            Some(job) => {
                shared.play_one(&job.clip, &job.cancel).await;
                shared.finish(job.clip.id, job.generation);
                let _ = job.released.send(());
            }
            None => shared.wake.notified().await,
        }
    }
}

pub struct PlaybackQueue {
    shared: Arc<Shared>,
    consumer: JoinHandle<()>,
}

impl PlaybackQueue {
    /// Spawn the consumer. Must be called inside a Tokio runtime.
    pub fn start(engine: Arc<dyn PlaybackEngine>, scratch: ScratchDir, timeout: Duration) -> Self {
        let (snapshot, _) = watch::channel(QueueSnapshot::default());
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            engine,
            scratch,
            timeout,
            snapshot,
        });
        let consumer = tokio::spawn(run_consumer(shared.clone()));
        Self { shared, consumer }
    }

    /// Append a clip to the tail. Never blocks; returns the clip id.
    pub fn enqueue(&self, payload: Vec<u8>) -> u64 {
        let id = {
            let mut state = self.shared.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.pending.push_back(PendingAudioClip {
                id,
                payload,
                enqueued_at: Instant::now(),
            });
            self.shared.publish(&state);
            id
        };
        log::debug!("[playback] queued clip {}", id);
        self.shared.wake.notify_one();
        id
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        *self.shared.snapshot.borrow()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Resolves once nothing is pending or playing.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|snap| snap.is_idle()).await;
    }

    /// Drop every pending clip and cancel the one playing. Returns once the
    /// cancelled clip has released its scratch file (or a short grace period
    /// has passed).
    pub async fn clear(&self) {
        let cancelled = self.discard();
        self.settle(cancelled).await;
    }

    /// The synchronous half of `clear()`: empties the queue and retires the
    /// current generation without awaiting. Callers that must clear under
    /// their own lock do this there and `settle` afterwards.
    pub fn discard(&self) -> Option<CancelledClip> {
        let mut state = self.shared.lock();
        state.generation += 1;
        let dropped = state.pending.len();
        state.pending.clear();
        let in_flight = state.in_flight.take();
        self.shared.publish(&state);
        if dropped > 0 || in_flight.is_some() {
            log::info!(
                "[playback] cleared {} pending clip(s){}",
                dropped,
                if in_flight.is_some() { " and the one playing" } else { "" }
            );
        }
        in_flight.map(CancelledClip)
    }

    /// Stop the engine for a clip taken by `discard` and wait for its scratch
    /// file to go.
    pub async fn settle(&self, cancelled: Option<CancelledClip>) {
        let Some(CancelledClip(mut in_flight)) = cancelled else {
            return;
        };
        in_flight.cancel.notify_one();
        self.shared.engine.stop().await;
        if let Some(released) = in_flight.released.take() {
            if tokio::time::timeout(CANCEL_GRACE, released).await.is_err() {
                log::warn!(
                    "[playback] clip {} did not release within {}ms",
                    in_flight.id,
                    CANCEL_GRACE.as_millis()
                );
            }
        }
    }
}

/// A clip that was playing when the queue was discarded.
pub struct CancelledClip(InFlight);

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    /// Engine driven by the clip contents: `fail*` errors, `hang*` never
    /// finishes on its own, anything else plays for 20ms.
    struct ScriptedEngine {
        dir: PathBuf,
        log: Mutex<Vec<String>>,
        stop: Notify,
    }

    impl ScriptedEngine {
        fn new(dir: &Path) -> Arc<Self> {
            Arc::new(Self {
                dir: dir.to_path_buf(),
                log: Mutex::new(Vec::new()),
                stop: Notify::new(),
            })
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn play(&self, clip: &Path) -> Result<()> {
            let body = String::from_utf8(std::fs::read(clip).unwrap()).unwrap();
            let files_on_disk = std::fs::read_dir(&self.dir).unwrap().count();
            self.log
                .lock()
                .unwrap()
                .push(format!("start {} files={}", body, files_on_disk));
            if body.starts_with("fail") {
                return Err(SessionError::Playback("engine refused".into()));
            }
            let wait = if body.starts_with("hang") {
                Duration::from_secs(3600)
            } else {
                Duration::from_millis(20)
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.stop.notified() => {
                    return Err(SessionError::Playback("stopped".into()));
                }
            }
            self.log.lock().unwrap().push(format!("end {}", body));
            Ok(())
        }

        async fn stop(&self) {
            self.stop.notify_waiters();
        }
    }

    fn queue(engine: Arc<ScriptedEngine>, dir: &Path, timeout: Duration) -> PlaybackQueue {
        PlaybackQueue::start(engine, ScratchDir::new(dir), timeout)
    }

    async fn idle(q: &PlaybackQueue) {
        tokio::time::timeout(Duration::from_secs(5), q.wait_idle())
            .await
            .expect("queue never went idle");
    }

    #[tokio::test]
    async fn clips_play_in_order_one_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(dir.path());
        let q = queue(engine.clone(), dir.path(), Duration::from_secs(5));

        q.enqueue(b"A".to_vec());
        q.enqueue(b"B".to_vec());
        q.enqueue(b"C".to_vec());
        assert!(q.len() >= 2);
        idle(&q).await;

        assert_eq!(
            engine.log(),
            vec![
                "start A files=1",
                "end A",
                "start B files=1",
                "end B",
                "start C files=1",
                "end C"
            ]
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_clip_is_dropped_and_next_plays() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(dir.path());
        let q = queue(engine.clone(), dir.path(), Duration::from_secs(5));

        q.enqueue(b"fail-1".to_vec());
        q.enqueue(b"ok".to_vec());
        idle(&q).await;

        assert_eq!(
            engine.log(),
            vec!["start fail-1 files=1", "start ok files=1", "end ok"]
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stalled_clip_times_out_and_next_plays() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(dir.path());
        let q = queue(engine.clone(), dir.path(), Duration::from_millis(100));

        q.enqueue(b"hang".to_vec());
        q.enqueue(b"after".to_vec());
        idle(&q).await;

        assert_eq!(
            engine.log(),
            vec!["start hang files=1", "start after files=1", "end after"]
        );
    }

    #[tokio::test]
    async fn clear_cancels_in_flight_and_drops_pending() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(dir.path());
        let q = queue(engine.clone(), dir.path(), Duration::from_secs(60));

        q.enqueue(b"hang".to_vec());
        q.enqueue(b"never-1".to_vec());
        q.enqueue(b"never-2".to_vec());
        let mut rx = q.subscribe();
        rx.wait_for(|s| s.playing).await.unwrap();

        q.clear().await;
        assert_eq!(q.snapshot(), QueueSnapshot::default());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // The cancelled clip's completion must not disturb a new clip.
        q.enqueue(b"fresh".to_vec());
        idle(&q).await;
        assert_eq!(
            engine.log(),
            vec!["start hang files=1", "start fresh files=1", "end fresh"]
        );
    }

    #[tokio::test]
    async fn discard_empties_at_once_and_settle_releases_the_clip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(dir.path());
        let q = queue(engine.clone(), dir.path(), Duration::from_secs(60));

        q.enqueue(b"hang".to_vec());
        q.enqueue(b"never".to_vec());
        let mut rx = q.subscribe();
        rx.wait_for(|s| s.playing).await.unwrap();

        let cancelled = q.discard();
        assert!(cancelled.is_some());
        assert_eq!(q.snapshot(), QueueSnapshot::default());
        assert!(q.discard().is_none());

        q.settle(cancelled).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(engine.log(), vec!["start hang files=1"]);
        q.settle(None).await;
    }

    #[tokio::test]
    async fn clear_on_idle_queue_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(dir.path());
        let q = queue(engine, dir.path(), Duration::from_secs(5));
        q.clear().await;
        q.clear().await;
        assert!(q.is_empty());
    }

    #[test]
    fn snapshot_len_counts_in_flight() {
        let snap = QueueSnapshot {
            pending: 2,
            playing: true,
        };
        assert_eq!(snap.len(), 3);
        assert!(!snap.is_idle());
        assert!(QueueSnapshot::default().is_idle());
    }
}
