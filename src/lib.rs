//! Session core for a voice assistant client: one WebSocket to the backend,
//! typed frame dispatch, reassembly of streamed code/console output, an
//! append-only transcript and strictly ordered playback of response audio.

pub mod audio;
pub mod capture;
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod reassembly;
pub mod session;
pub mod settings;
pub mod transcript;

pub use client::Client;
pub use connection::ConnectionStatus;
pub use error::{Result, SessionError};
pub use playback::{HeadlessPlayer, PlaybackEngine, QueueSnapshot};
pub use session::SessionSnapshot;
pub use settings::Settings;
pub use transcript::{EntryKind, TranscriptEntry};
