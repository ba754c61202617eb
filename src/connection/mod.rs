pub mod status;

pub use status::{ConnectionStatus, StatusEvent};

use crate::error::{Result, SessionError};
use crate::protocol::OutboundFrame;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite};

/// Something that happened on one socket. `generation` identifies the socket
/// so events from a torn-down socket can be told apart from the live one.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEvent {
    pub generation: u64,
    pub kind: LinkEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Opened,
    Frame(String),
    Closed(String),
    Failed { error: String, permanent: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Opening,
    Open,
}

struct Link {
    generation: u64,
    state: LinkState,
    outbound: mpsc::UnboundedSender<tungstenite::Message>,
    task: JoinHandle<()>,
}

/// Reconnect backoff, used only when automatic reconnect is enabled.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_retries: u32,
}

impl Backoff {
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(10);
        let factor = 1u64 << exp;
        (self.base_ms.saturating_mul(factor)).min(self.max_ms)
    }
}

/// Owns the one socket to the backend. Opening spawns a task that connects,
/// forwards inbound text frames as `SocketEvent`s and writes queued outbound
/// messages. Closing drops the outbound sender, which makes that task send a
/// close frame and exit.
pub struct ConnectionManager {
    url: String,
    connect_timeout: Duration,
    generation: u64,
    link: Option<Link>,
    attempts: u32,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            generation: 0,
            link: None,
            attempts: 0,
            events,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.link,
            Some(Link {
                state: LinkState::Open,
                ..
            })
        )
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Start a fresh socket, dropping any previous one. Returns its generation.
    pub fn open(&mut self) -> u64 {
        self.drop_link();
        self.generation += 1;
        let generation = self.generation;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            generation,
            self.url.clone(),
            self.connect_timeout,
            outbound_rx,
            self.events.clone(),
        ));
        self.link = Some(Link {
            generation,
            state: LinkState::Opening,
            outbound: outbound_tx,
            task,
        });
        log::info!("[ws] connecting gen={} url={}", generation, self.url);
        generation
    }

    /// Tear down the current socket. Returns whether there was one.
    pub fn close(&mut self) -> bool {
        let had_link = self.link.is_some();
        self.drop_link();
        // Late events from the old socket now carry a stale generation.
        self.generation += 1;
        had_link
    }

    fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            log::info!("[ws] closing gen={}", link.generation);
            if link.state == LinkState::Opening {
                // Still inside the handshake; nothing to close gracefully.
                link.task.abort();
            }
        }
    }

    pub fn mark_open(&mut self, generation: u64) -> bool {
        match self.link.as_mut() {
            Some(link) if link.generation == generation => {
                link.state = LinkState::Open;
                self.attempts = 0;
                true
            }
            _ => false,
        }
    }

    pub fn mark_down(&mut self, generation: u64) -> bool {
        match self.link.as_ref() {
            Some(link) if link.generation == generation => {
                self.link = None;
                true
            }
            _ => false,
        }
    }

    /// Count a failed or dropped connection; returns the attempt number.
    pub fn note_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn send(&self, frame: &OutboundFrame) -> Result<()> {
        let link = match self.link.as_ref() {
            Some(link) if link.state == LinkState::Open => link,
            _ => return Err(SessionError::Connection("not connected".into())),
        };
        let text = frame.encode()?;
        link.outbound
            .send(tungstenite::Message::Text(text.into()))
            .map_err(|_| SessionError::Connection("socket writer has stopped".into()))?;
        log::debug!("[ws] queued {} frame gen={}", frame.kind(), link.generation);
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

fn build_ws_request(url: &str) -> Result<tungstenite::http::Request<()>> {
    let mut request = url
        .into_client_request()
        .map_err(|e| SessionError::Connection(format!("Failed to build request: {}", e)))?;
    request.headers_mut().insert(
        "User-Agent",
        HeaderValue::from_static(concat!("voicelink/", env!("CARGO_PKG_VERSION"))),
    );
    Ok(request)
}

pub(crate) fn is_permanent_connect_error(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Http(resp) => {
            let code = resp.status().as_u16();
            code == 401 || code == 403
        }
        tungstenite::Error::Url(_) => true,
        _ => {
            let text = err.to_string();
            text.contains("401") || text.contains("403")
        }
    }
}

async fn run_link(
    generation: u64,
    url: String,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<tungstenite::Message>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let emit = |kind: LinkEvent| {
        let _ = events.send(SocketEvent { generation, kind });
    };

    let request = match build_ws_request(&url) {
        Ok(req) => req,
        Err(e) => {
            emit(LinkEvent::Failed {
                error: e.to_string(),
                permanent: true,
            });
            return;
        }
    };

    let ws_stream = match tokio::time::timeout(connect_timeout, connect_async(request)).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            log::warn!("[ws] connect failed gen={}: {}", generation, e);
            emit(LinkEvent::Failed {
                permanent: is_permanent_connect_error(&e),
                error: e.to_string(),
            });
            return;
        }
        Err(_) => {
            log::warn!(
                "[ws] connect timed out gen={} after {}ms",
                generation,
                connect_timeout.as_millis()
            );
            emit(LinkEvent::Failed {
                error: format!("connect timed out after {}ms", connect_timeout.as_millis()),
                permanent: false,
            });
            return;
        }
    };
    log::info!("[ws] connected gen={}", generation);
    emit(LinkEvent::Opened);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            out = outbound_rx.recv() => {
                match out {
                    Some(msg) => {
                        if let Err(e) = ws_tx.send(msg).await {
                            log::warn!("[ws] send failed gen={}: {}", generation, e);
                            emit(LinkEvent::Failed { error: e.to_string(), permanent: false });
                            break;
                        }
                    }
                    None => {
                        // Manager dropped the link.
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        emit(LinkEvent::Frame(text.to_string()));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => format!("{} {}", frame.code, frame.reason),
                            None => "closed by peer".to_string(),
                        };
                        log::info!("[ws] websocket closed gen={}: {}", generation, reason);
                        emit(LinkEvent::Closed(reason));
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::warn!("[ws] websocket error gen={}: {}", generation, e);
                        emit(LinkEvent::Failed { error: e.to_string(), permanent: false });
                        break;
                    }
                    None => {
                        emit(LinkEvent::Closed("stream ended".into()));
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff {
            base_ms: 800,
            max_ms: 30_000,
            max_retries: 12,
        };
        assert_eq!(backoff.delay_ms(1), 800);
        assert_eq!(backoff.delay_ms(2), 1_600);
        assert_eq!(backoff.delay_ms(3), 3_200);
        assert_eq!(backoff.delay_ms(7), 30_000);
        assert_eq!(backoff.delay_ms(40), 30_000);
    }

    #[test]
    fn send_without_link_is_a_connection_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new("ws://127.0.0.1:1/ws", Duration::from_secs(1), tx);
        let err = manager.send(&OutboundFrame::text("hi")).unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
    }

    #[tokio::test]
    async fn opening_link_is_not_sendable_and_close_bumps_generation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager =
            ConnectionManager::new("ws://127.0.0.1:9/ws", Duration::from_millis(200), tx);
        let generation = manager.open();
        assert!(manager.has_link());
        assert!(!manager.is_open());
        assert!(manager.send(&OutboundFrame::text("hi")).is_err());

        assert!(manager.close());
        assert!(!manager.is_current(generation));
        assert!(!manager.mark_open(generation));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_failure_for_its_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager =
            ConnectionManager::new("ws://127.0.0.1:9/ws", Duration::from_secs(2), tx);
        let generation = manager.open();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation, generation);
        assert!(matches!(event.kind, LinkEvent::Failed { .. }));
    }
}
