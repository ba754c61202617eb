//! The client: owns the session, the socket and the playback queue, and runs
//! the driver task that feeds socket events through the dispatcher.

use crate::capture::CaptureHandle;
use crate::connection::{Backoff, ConnectionManager, LinkEvent, SocketEvent, StatusEvent};
use crate::dispatch::{self, Routed};
use crate::error::{Result, SessionError};
use crate::playback::{PlaybackEngine, PlaybackQueue, QueueSnapshot, ScratchDir};
use crate::protocol::OutboundFrame;
use crate::session::{Session, SessionSnapshot};
use crate::settings::Settings;
use crate::transcript::{EntryKind, TranscriptEntry};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Session plus socket. Every mutation happens under one lock and runs to
/// completion without awaiting.
pub(crate) struct Core {
    pub(crate) session: Session,
    pub(crate) connection: ConnectionManager,
    backoff: Option<Backoff>,
}

/// What the driver still has to do after a socket event was applied.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Followup {
    pub clip: Option<Vec<u8>>,
    pub retry: Option<Retry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Retry {
    pub after: Duration,
    /// Connection generation the retry was scheduled for. Any close, reconnect
    /// or reset moves the generation on and cancels it.
    pub generation: u64,
}

impl Core {
    pub(crate) fn new(connection: ConnectionManager, backoff: Option<Backoff>) -> Self {
        Self {
            session: Session::new(),
            connection,
            backoff,
        }
    }

    pub(crate) fn handle_socket(&mut self, event: SocketEvent) -> Followup {
        if !self.connection.is_current(event.generation) {
            log::debug!(
                "[session] ignoring event from stale socket gen={} (current {})",
                event.generation,
                self.connection.generation()
            );
            return Followup::default();
        }

        match event.kind {
            LinkEvent::Opened => {
                self.connection.mark_open(event.generation);
                self.session.apply(StatusEvent::Opened);
                self.session.clear_alert();
                Followup::default()
            }
            LinkEvent::Frame(text) => match dispatch::dispatch(&mut self.session, &text) {
                Routed::Audio(payload) => Followup {
                    clip: Some(payload),
                    retry: None,
                },
                _ => Followup::default(),
            },
            LinkEvent::Closed(reason) => {
                self.connection.mark_down(event.generation);
                self.session.apply(StatusEvent::Closed);
                self.session
                    .record(SessionError::Connection(format!("socket closed: {}", reason)));
                Followup {
                    clip: None,
                    retry: self.schedule_retry(false),
                }
            }
            LinkEvent::Failed { error, permanent } => {
                self.connection.mark_down(event.generation);
                self.session.apply(StatusEvent::TransportError);
                self.session.record(SessionError::Connection(error));
                Followup {
                    clip: None,
                    retry: self.schedule_retry(permanent),
                }
            }
        }
    }

    fn schedule_retry(&mut self, permanent: bool) -> Option<Retry> {
        let backoff = self.backoff?;
        if permanent {
            log::warn!("[ws] handshake rejected, not retrying");
            return None;
        }
        let attempt = self.connection.note_attempt();
        if attempt > backoff.max_retries {
            log::warn!("[ws] giving up after {} attempts", backoff.max_retries);
            return None;
        }
        let delay = backoff.delay_ms(attempt);
        log::info!("[ws] reconnect attempt {} in {}ms", attempt, delay);
        Some(Retry {
            after: Duration::from_millis(delay),
            generation: self.connection.generation(),
        })
    }

    /// Fire a scheduled retry if nothing has touched the connection since.
    pub(crate) fn retry(&mut self, generation: u64) -> bool {
        if !self.connection.is_current(generation) || self.connection.has_link() {
            return false;
        }
        self.reconnect();
        true
    }

    pub(crate) fn connect(&mut self) {
        if self.connection.has_link() {
            log::debug!("[session] connect ignored, socket already {}", self.session.status());
            return;
        }
        self.connection.open();
        if !self.session.apply(StatusEvent::Connect) {
            self.session.apply(StatusEvent::Reconnect);
        }
    }

    pub(crate) fn close(&mut self) {
        self.connection.close();
        self.session.apply(StatusEvent::CloseRequested);
    }

    pub(crate) fn reconnect(&mut self) {
        self.connection.close();
        self.connection.open();
        self.session.apply(StatusEvent::Reconnect);
    }

    /// Send, recording a failure as the session alert before returning it.
    fn send(&mut self, frame: &OutboundFrame) -> Result<()> {
        self.connection.send(frame).map_err(|e| {
            self.session.record(e.clone());
            e
        })
    }

    pub(crate) fn send_text(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        self.send(&OutboundFrame::text(text))?;
        self.session.transcript.append(EntryKind::User, text);
        self.session.awaiting_response = true;
        Ok(())
    }

    pub(crate) fn send_captured_audio(&mut self, wav: &[u8]) -> Result<()> {
        if wav.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        self.send(&OutboundFrame::audio(wav))?;
        self.session.awaiting_response = true;
        Ok(())
    }

    pub(crate) fn send_input_response(&mut self, response: &str) -> Result<()> {
        if self.session.pending_prompt.is_none() {
            return Err(SessionError::NoPendingPrompt);
        }
        self.send(&OutboundFrame::text(response))?;
        self.session.pending_prompt = None;
        self.session.reassembler.clear();
        self.session.awaiting_response = true;
        Ok(())
    }

    /// Fresh session, fresh socket. The new socket's open lands in Idle.
    pub(crate) fn reset(&mut self) {
        self.connection.close();
        self.session = Session::after_reset();
        self.connection.open();
        self.session.apply(StatusEvent::Reconnect);
    }
}

struct Inner {
    core: Mutex<Core>,
    queue: PlaybackQueue,
    settings: Settings,
    snapshot: watch::Sender<SessionSnapshot>,
    capture: tokio::sync::Mutex<Option<CaptureHandle>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, core: &Core) {
        let snap = core.session.snapshot(self.queue.snapshot());
        self.snapshot.send_if_modified(|current| {
            if *current == snap {
                false
            } else {
                *current = snap;
                true
            }
        });
    }

    /// Run `f` against the core under the lock, then publish a snapshot.
    fn with_core<T>(&self, f: impl FnOnce(&mut Core) -> T) -> T {
        let mut core = self.lock();
        let out = f(&mut core);
        self.publish(&core);
        out
    }
}

pub struct Client {
    inner: Arc<Inner>,
    driver: JoinHandle<()>,
}

impl Client {
    /// Build the client and spawn its driver. Does not connect. Must be called
    /// inside a Tokio runtime.
    pub fn start(settings: Settings, engine: Arc<dyn PlaybackEngine>) -> Result<Self> {
        settings.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(
            settings.endpoint_url.trim(),
            settings.connect_timeout(),
            events_tx,
        );
        let backoff = settings.auto_reconnect.then_some(Backoff {
            base_ms: settings.reconnect_base_ms,
            max_ms: settings.reconnect_max_ms,
            max_retries: settings.reconnect_max_retries,
        });
        let core = Core::new(connection, backoff);
        let queue = PlaybackQueue::start(
            engine,
            ScratchDir::new(settings.scratch_path()),
            settings.playback_timeout(),
        );
        let queue_rx = queue.subscribe();
        let (snapshot, _) = watch::channel(core.session.snapshot(QueueSnapshot::default()));
        log::info!(
            "[session] client ready endpoint={} auto_reconnect={}",
            settings.endpoint_url,
            settings.auto_reconnect
        );

        let inner = Arc::new(Inner {
            core: Mutex::new(core),
            queue,
            settings,
            snapshot,
            capture: tokio::sync::Mutex::new(None),
        });
        let driver = tokio::spawn(drive(inner.clone(), events_rx, queue_rx));
        Ok(Self { inner, driver })
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn connect(&self) {
        self.inner.with_core(Core::connect);
    }

    pub fn close(&self) {
        self.inner.with_core(Core::close);
    }

    pub fn reconnect(&self) {
        self.inner.with_core(Core::reconnect);
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.inner.with_core(|core| core.send_text(text))
    }

    pub fn send_captured_audio(&self, wav: &[u8]) -> Result<()> {
        self.inner.with_core(|core| core.send_captured_audio(wav))
    }

    /// Read a WAV file from disk and send it as captured audio.
    pub async fn send_audio_file(&self, path: &Path) -> Result<()> {
        let wav = tokio::fs::read(path).await.map_err(|e| {
            SessionError::Io(format!("failed to read '{}': {}", path.display(), e))
        })?;
        self.send_captured_audio(&wav)
    }

    pub fn send_input_response(&self, response: &str) -> Result<()> {
        self.inner.with_core(|core| core.send_input_response(response))
    }

    /// Drop everything the session holds and reconnect. Safe to repeat.
    pub async fn reset(&self) {
        log::info!("[session] reset requested");
        if self.inner.capture.lock().await.take().is_some() {
            log::info!("[capture] discarded active recording on reset");
        }
        // The core retires the old socket generation under the same lock that
        // gates enqueueing, so no frame from the old socket lands after this.
        let cancelled = {
            let mut core = self.inner.lock();
            core.reset();
            let cancelled = self.inner.queue.discard();
            self.inner.publish(&core);
            cancelled
        };
        self.inner.queue.settle(cancelled).await;
    }

    pub async fn start_capture(&self) -> Result<()> {
        let mut slot = self.inner.capture.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let settings = &self.inner.settings;
        match CaptureHandle::start(settings.input_device(), settings.capture_sample_rate).await {
            Ok(handle) => {
                log::info!("[capture] recording");
                *slot = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.with_core(|core| core.session.record(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop recording and send what was captured.
    pub async fn stop_capture(&self) -> Result<()> {
        let handle = self
            .inner
            .capture
            .lock()
            .await
            .take()
            .ok_or_else(|| SessionError::Capture("not recording".into()))?;
        match handle.finish().await {
            Ok(wav) => self.send_captured_audio(&wav),
            Err(e) => {
                self.inner.with_core(|core| core.session.record(e.clone()));
                Err(e)
            }
        }
    }

    pub async fn is_capturing(&self) -> bool {
        self.inner.capture.lock().await.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.inner.lock().session.transcript().entries().to_vec()
    }

    /// Entries with `sequence_index >= from`.
    pub fn transcript_since(&self, from: u64) -> Vec<TranscriptEntry> {
        self.inner.lock().session.transcript().since(from).to_vec()
    }

    pub fn diagnostics(&self) -> Vec<SessionError> {
        self.inner.lock().session.diagnostics().cloned().collect()
    }

    pub fn clear_alert(&self) {
        self.inner.with_core(|core| core.session.clear_alert());
    }

    pub fn queue(&self) -> QueueSnapshot {
        self.inner.queue.snapshot()
    }

    pub async fn wait_playback_idle(&self) {
        self.inner.queue.wait_idle().await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    mut queue_rx: watch::Receiver<QueueSnapshot>,
) {
    let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<u64>();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                // Enqueue under the core lock so a concurrent reset cannot
                // slip in between routing a clip and queueing it.
                let retry = {
                    let mut core = inner.lock();
                    let followup = core.handle_socket(event);
                    if let Some(clip) = followup.clip {
                        inner.queue.enqueue(clip);
                    }
                    inner.publish(&core);
                    followup.retry
                };
                if let Some(retry) = retry {
                    let tx = retry_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(retry.after).await;
                        let _ = tx.send(retry.generation);
                    });
                }
            }
            Some(generation) = retry_rx.recv() => {
                inner.with_core(|core| core.retry(generation));
            }
            changed = queue_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let core = inner.lock();
                inner.publish(&core);
            }
        }
    }
    log::debug!("[session] driver stopped");
}
