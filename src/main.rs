use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use voicelink::playback::PlaybackEngine;
use voicelink::{settings, Client, SessionError, SessionSnapshot, TranscriptEntry};

const HELP: &str = "\
commands:
  <text>        send a message (answers the prompt when one is pending)
  /wav <path>   send a WAV file as captured audio
  /rec          start recording from the microphone
  /stop         stop recording and send it
  /reset        clear the session and reconnect
  /reconnect    drop and reopen the socket
  /status       show connection and queue state
  /quit         exit";

fn main() {
    env_logger::init();

    let settings = settings::load();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[voicelink] failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(settings)) {
        eprintln!("[voicelink] {}", e);
        std::process::exit(1);
    }
}

#[cfg(feature = "audio-io")]
fn playback_engine(settings: &settings::Settings) -> Arc<dyn PlaybackEngine> {
    Arc::new(voicelink::playback::DevicePlayer::new(settings.output_device()))
}

#[cfg(not(feature = "audio-io"))]
fn playback_engine(settings: &settings::Settings) -> Arc<dyn PlaybackEngine> {
    if let Some(name) = settings.output_device() {
        log::warn!("[voicelink] output_device '{}' needs the audio-io feature", name);
    }
    Arc::new(voicelink::HeadlessPlayer::new())
}

async fn run(settings: settings::Settings) -> Result<(), SessionError> {
    let engine = playback_engine(&settings);
    println!(
        "[voicelink] endpoint {} (playback: {})",
        settings.endpoint_url,
        engine.name()
    );
    let client = Client::start(settings, engine)?;
    client.connect();
    println!("{}", HELP);

    let mut updates = client.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut seen: u64 = 0;
    let mut last = client.snapshot();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = updates.borrow_and_update().clone();
                if snap.transcript_len < seen as usize {
                    // Session was reset; the new transcript starts over.
                    seen = 0;
                }
                for entry in client.transcript_since(seen) {
                    print_entry(&entry);
                    seen = entry.sequence_index + 1;
                }
                report_changes(&last, &snap);
                last = snap;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("[voicelink] stdin error: {}", e);
                        break;
                    }
                };
                if !handle_line(&client, line.trim()).await {
                    break;
                }
            }
        }
    }

    client.close();
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(client: &Client, line: &str) -> bool {
    let result = match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) | ("/exit", _) => return false,
        ("/help", _) => {
            println!("{}", HELP);
            Ok(())
        }
        ("/reset", _) => {
            client.reset().await;
            println!("[voicelink] session reset");
            Ok(())
        }
        ("/reconnect", _) => {
            client.reconnect();
            Ok(())
        }
        ("/status", _) => {
            print_status(&client.snapshot());
            Ok(())
        }
        ("/wav", path) if !path.trim().is_empty() => {
            client.send_audio_file(Path::new(path.trim())).await
        }
        ("/rec", _) => client.start_capture().await.map(|_| {
            println!("[voicelink] recording, /stop to send");
        }),
        ("/stop", _) => client.stop_capture().await,
        _ if line.is_empty() && client.snapshot().pending_prompt.is_none() => Ok(()),
        _ if client.snapshot().pending_prompt.is_some() => client.send_input_response(line),
        _ if line.starts_with('/') => {
            println!("[voicelink] unknown command {}", line);
            Ok(())
        }
        _ => client.send_text(line),
    };

    if let Err(e) = result {
        eprintln!("[voicelink] {} ({})", e.user_message(), e);
    }
    true
}

fn print_entry(entry: &TranscriptEntry) {
    let ts = chrono::Local::now().format("%H:%M:%S");
    println!("[{}] {}: {}", ts, entry.kind.label(), entry.text);
}

fn report_changes(before: &SessionSnapshot, after: &SessionSnapshot) {
    if before.status != after.status {
        println!("[voicelink] status: {}", after.status);
    }
    if after.pending_prompt.is_some() && before.pending_prompt != after.pending_prompt {
        println!(
            "[voicelink] input required: {}",
            after.pending_prompt.as_deref().unwrap_or_default()
        );
    }
    if after.alert.is_some() && before.alert != after.alert {
        eprintln!(
            "[voicelink] {}",
            after.alert.as_deref().unwrap_or_default()
        );
    }
}

fn print_status(snap: &SessionSnapshot) {
    println!(
        "[voicelink] status={} awaiting={} queue={} playing={} open_buffers={} entries={}",
        snap.status,
        snap.awaiting_response,
        snap.queue_len,
        snap.playing,
        snap.open_buffers,
        snap.transcript_len
    );
    if let Some(prompt) = &snap.pending_prompt {
        println!("[voicelink] pending prompt: {}", prompt);
    }
}
