//! Operator-side command handlers.
//!
//! These run in the CLI process — the privileged context that picks files
//! and watches progress. The parsed contact list lives in an explicit
//! [`SendSession`] owned here; nothing about a run is ambient state.

use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use colored::Colorize;
use futures_util::{SinkExt, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::history::HistoryLog;
use crate::protocol::{ControlMessage, EventMessage};
use crate::relay::SpoolStore;
use crate::roster::{self, Contact};
use crate::runner::OutcomeKind;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// The contact list currently under operation, owned by the CLI.
pub struct SendSession {
    pub file_name: String,
    pub contacts: Vec<Contact>,
}

// ── Commands ────────────────────────────────────────────────────────────────

/// Ingest a roster through the daemon and run the whole batch.
pub async fn cmd_send(config: &Config, file: &Path) -> Result<()> {
    let mut ws = connect(config).await?;
    ensure_ready(&mut ws).await?;

    let session = push_file(config, &mut ws, file, false).await?;
    print_preview(&session.contacts);

    send_control(
        &mut ws,
        &ControlMessage::StartSending { data: session.contacts.clone() },
    )
    .await?;

    stream_progress(&mut ws).await
}

/// Ingest a roster into the daemon without starting a batch.
pub async fn cmd_push(config: &Config, file: &Path, inline: bool) -> Result<()> {
    let mut ws = connect(config).await?;
    ensure_ready(&mut ws).await?;

    let session = push_file(config, &mut ws, file, inline).await?;
    print_preview(&session.contacts);
    println!(
        "{}",
        format!("File processed with {} records.", session.contacts.len()).green()
    );
    Ok(())
}

/// Validate and preview a roster locally, without a daemon.
pub fn cmd_validate(file: &Path) -> Result<()> {
    let contacts = roster::load_file(file)?;
    print_preview(&contacts);
    println!(
        "{}",
        format!("File processed with {} records.", contacts.len()).green()
    );
    Ok(())
}

/// Print the history log, newest first.
pub fn cmd_history(config: &Config, limit: usize) -> Result<()> {
    let log = HistoryLog::open(&config.history_path())
        .context("Failed to open the message history log")?;
    let entries = log.recent(limit)?;

    if entries.is_empty() {
        println!("No message history yet.");
        return Ok(());
    }

    for entry in entries {
        let status = match entry.status {
            OutcomeKind::Sent => entry.status.as_str().green(),
            OutcomeKind::Failed => entry.status.as_str().red(),
            OutcomeKind::Cancelled => entry.status.as_str().dimmed(),
        };
        let who = if entry.name.is_empty() { &entry.phone } else { &entry.name };
        let when = entry
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S");
        println!("{status}: {who} — {}", truncate(&entry.result, 100));
        println!("    {}", when.to_string().dimmed());
    }
    Ok(())
}

/// Readiness probe against the daemon.
pub async fn cmd_status(config: &Config) -> Result<()> {
    let mut ws = connect(config).await?;
    match probe_ready(&mut ws).await? {
        true => println!("{}", "Daemon is ready.".green()),
        false => println!("{}", "Daemon is up but not ready — automation page unreachable.".yellow()),
    }
    Ok(())
}

// ── Gateway client plumbing ─────────────────────────────────────────────────

async fn connect(config: &Config) -> Result<WsStream> {
    let (stream, _) = tokio_tungstenite::connect_async(config.gateway_url.as_str())
        .await
        .with_context(|| {
            format!(
                "Failed to reach the automation daemon at {} — is `whatsblitz gateway run` up?",
                config.gateway_url
            )
        })?;
    Ok(stream)
}

async fn send_control(ws: &mut WsStream, control: &ControlMessage) -> Result<()> {
    let frame = serde_json::to_string(control)?;
    ws.send(Message::Text(frame.into()))
        .await
        .context("Failed to send control message")
}

/// Next event frame, skipping pings and other non-text traffic.
async fn next_event(ws: &mut WsStream) -> Result<EventMessage> {
    loop {
        match ws.next().await {
            None => bail!("Daemon closed the connection"),
            Some(message) => match message.context("WebSocket read failed")? {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).context("Malformed event frame");
                }
                Message::Close(_) => bail!("Daemon closed the connection"),
                _ => continue,
            },
        }
    }
}

async fn probe_ready(ws: &mut WsStream) -> Result<bool> {
    send_control(ws, &ControlMessage::IsContentScriptReady).await?;
    loop {
        if let EventMessage::Ready { ready } = next_event(ws).await? {
            return Ok(ready);
        }
    }
}

async fn ensure_ready(ws: &mut WsStream) -> Result<()> {
    if !probe_ready(ws).await? {
        bail!("Daemon is not ready — the automation page is unreachable");
    }
    Ok(())
}

/// Hand the file to the daemon — through the spool by default, inline when
/// asked — and wait for the ingestion verdict.
async fn push_file(
    config: &Config,
    ws: &mut WsStream,
    file: &Path,
    inline: bool,
) -> Result<SendSession> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_type = mime_for(&file_name).to_string();

    if inline {
        send_control(
            ws,
            &ControlMessage::ProcessFileInBackground {
                file_array_buffer: BASE64.encode(&bytes),
                file_name: file_name.clone(),
                file_type,
            },
        )
        .await?;
    } else {
        let spool = SpoolStore::new(&config.state_dir);
        let storage_key = spool.put(&file_name, &file_type, &bytes)?;
        send_control(
            ws,
            &ControlMessage::ProcessFileFromStorage {
                storage_key,
                file_name: file_name.clone(),
                file_type,
            },
        )
        .await?;
    }

    wait_for_data(ws, file_name).await
}

async fn wait_for_data(ws: &mut WsStream, file_name: String) -> Result<SendSession> {
    loop {
        match next_event(ws).await? {
            EventMessage::DataReady { data, .. } => {
                return Ok(SendSession { file_name, contacts: data });
            }
            EventMessage::ValidationError { text } => bail!("Validation failed: {text}"),
            EventMessage::DataCleared { text } | EventMessage::Error { text } => bail!("{text}"),
            _ => continue,
        }
    }
}

/// Render `status` events until the run completes.
async fn stream_progress(ws: &mut WsStream) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.green} {pos:>3}% {msg}")
            .context("Invalid progress bar template")?,
    );

    loop {
        match next_event(ws).await? {
            EventMessage::Status { text, progress, completed } => {
                if let Some(progress) = progress {
                    bar.set_position(progress.round() as u64);
                }
                bar.set_message(text.clone());
                if completed == Some(true) {
                    bar.finish_and_clear();
                    if text.starts_with("Completed!") {
                        println!("{}", text.green().bold());
                    } else {
                        println!("{}", text.yellow().bold());
                    }
                    return Ok(());
                }
            }
            EventMessage::Error { text } => {
                bar.abandon();
                bail!("{text}");
            }
            _ => continue,
        }
    }
}

// ── Rendering helpers ───────────────────────────────────────────────────────

/// First three contacts, sidebar-style, then a count of the rest.
fn print_preview(contacts: &[Contact]) {
    for contact in contacts.iter().take(3) {
        println!(
            "{} {} · {} · {}",
            "▸".dimmed(),
            if contact.name.is_empty() { "N/A" } else { &contact.name },
            if contact.phone.is_empty() { "N/A" } else { &contact.phone },
            truncate(&contact.processed_message, 50),
        );
    }
    if contacts.len() > 3 {
        println!("{}", format!("... and {} more contacts", contacts.len() - 3).dimmed());
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("csv") => "text/csv",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("short", 50), "short");
    }

    #[test]
    fn truncate_cuts_long_strings_with_ellipsis() {
        let long = "x".repeat(120);
        let cut = truncate(&long, 100);
        assert_eq!(cut.chars().count(), 103);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn mime_mapping_covers_supported_extensions() {
        assert_eq!(mime_for("a.csv"), "text/csv");
        assert_eq!(mime_for("a.XLSX"), "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet");
        assert_eq!(mime_for("a.xls"), "application/vnd.ms-excel");
        assert_eq!(mime_for("a.bin"), "application/octet-stream");
    }
}
