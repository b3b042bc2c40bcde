//! Automation-side control gateway.
//!
//! The daemon owns the browser session and listens on a local WebSocket.
//! Operator clients send `action`-tagged control messages; events are
//! broadcast back to every connected client as `type`-tagged frames.
//! Only one batch runs at a time.

use crate::browser::BrowserSession;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, PageLiveness};
use crate::history::HistoryLog;
use crate::protocol::{ControlMessage, EventMessage};
use crate::relay::SpoolStore;
use crate::roster::{self, Contact};
use crate::runner::BatchRunner;
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chromiumoxide::Page;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub listen: String,
}

/// Shared state for every connection handler.
struct GatewayState {
    config: Config,
    spool: SpoolStore,
    history: HistoryLog,
    page: Page,
    batch_running: AtomicBool,
    events: broadcast::Sender<EventMessage>,
}

impl GatewayState {
    fn emit(&self, event: EventMessage) {
        // No subscribers just means nobody is watching right now.
        let _ = self.events.send(event);
    }
}

/// Run the gateway until the cancel token fires.
///
/// The browser session is attached before the listener starts serving;
/// failing to reach a browser is fatal at startup, not per batch.
pub async fn run_gateway(
    config: Config,
    options: GatewayOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = resolve_listen_addr(&options.listen)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;

    let session = BrowserSession::open(&config.browser, &config.target_url)
        .await
        .context("Failed to attach to a browser — install Chromium or set browser.cdp_url")?;
    let history = HistoryLog::open(&config.history_path())
        .context("Failed to open the message history log")?;
    let spool = SpoolStore::new(&config.state_dir);

    let (events, _) = broadcast::channel(256);
    let state = Arc::new(GatewayState {
        page: session.page().clone(),
        config,
        spool,
        history,
        batch_running: AtomicBool::new(false),
        events,
    });

    tracing::info!(%addr, "gateway listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let state = state.clone();
                let child_cancel = cancel.child_token();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, peer, state, child_cancel).await {
                        tracing::warn!(%peer, %err, "gateway connection error");
                    }
                });
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Accept `ws://host:port` URLs or bare `host:port` strings.
fn resolve_listen_addr(listen: &str) -> Result<SocketAddr> {
    let trimmed = listen.trim();
    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        let url = Url::parse(trimmed).context("Invalid WebSocket URL")?;
        let host = url.host_str().context("WebSocket URL missing host")?;
        let port = url
            .port_or_known_default()
            .context("WebSocket URL missing port")?;
        let addr = format!("{host}:{port}");
        return addr
            .parse()
            .with_context(|| format!("Invalid listen address {addr}"));
    }

    trimmed
        .parse()
        .with_context(|| format!("Invalid listen address {trimmed}"))
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    _peer: SocketAddr,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut writer, mut reader) = ws_stream.split();
    let mut events = state.events.subscribe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let frame = serde_json::to_string(&event)?;
                        writer
                            .send(Message::Text(frame.into()))
                            .await
                            .context("Failed to push event frame")?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event stream lagged for a slow client");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = reader.next() => {
                let Some(message) = incoming else { break };
                match message.context("WebSocket read failed")? {
                    Message::Text(text) => {
                        if let Some(reply) = handle_control(&state, text.as_str()).await {
                            let frame = serde_json::to_string(&reply)?;
                            writer
                                .send(Message::Text(frame.into()))
                                .await
                                .context("Failed to send reply frame")?;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

/// Dispatch one control message. A returned event is a direct reply to the
/// requesting client; everything else is broadcast.
async fn handle_control(state: &Arc<GatewayState>, raw: &str) -> Option<EventMessage> {
    let control: ControlMessage = match serde_json::from_str(raw) {
        Ok(control) => control,
        Err(err) => {
            tracing::debug!(%err, "unparseable control message");
            return Some(EventMessage::error(format!("Unrecognized control message: {err}")));
        }
    };

    match control {
        ControlMessage::IsContentScriptReady => {
            let ready = state.page.url().await.is_ok();
            Some(EventMessage::Ready { ready })
        }
        ControlMessage::ProcessFileFromStorage { storage_key, file_name, .. } => {
            ingest_from_spool(state, &storage_key, &file_name);
            None
        }
        ControlMessage::ProcessFileInBackground { file_array_buffer, file_name, file_type } => {
            // Inline payloads ride through the spool too, so both intake
            // paths share the single-use hand-off discipline.
            let bytes = match BASE64.decode(file_array_buffer.as_bytes()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    return Some(EventMessage::error(format!("Malformed inline file payload: {err}")));
                }
            };
            let key = match state.spool.put(&file_name, &file_type, &bytes) {
                Ok(key) => key,
                Err(err) => return Some(EventMessage::error(err.to_string())),
            };
            ingest_from_spool(state, &key, &file_name);
            None
        }
        ControlMessage::StartSending { data } => start_batch(state, data),
    }
}

/// Consume a spooled payload and run it through the ingestion pipeline,
/// broadcasting the result.
fn ingest_from_spool(state: &Arc<GatewayState>, key: &str, file_name: &str) {
    let bytes = match state.spool.take(key) {
        Ok(bytes) => bytes,
        Err(err) => {
            state.emit(EventMessage::error(err.to_string()));
            return;
        }
    };

    if bytes.is_empty() {
        state.emit(EventMessage::DataCleared { text: "No file selected.".to_string() });
        return;
    }

    match roster::ingest(file_name, &bytes) {
        Ok(contacts) => {
            let text = format!("File processed with {} records.", contacts.len());
            tracing::info!(records = contacts.len(), file_name, "roster ingested");
            state.emit(EventMessage::DataReady { data: contacts, text });
        }
        Err(err) if err.is_validation() => {
            state.emit(EventMessage::ValidationError { text: err.to_string() });
        }
        Err(err) => {
            state.emit(EventMessage::error(err.to_string()));
        }
    }
}

/// Kick off a batch in the background, if none is running.
fn start_batch(state: &Arc<GatewayState>, data: Vec<Contact>) -> Option<EventMessage> {
    if data.is_empty() {
        return Some(EventMessage::error("No data to send"));
    }
    if state.batch_running.swap(true, Ordering::SeqCst) {
        return Some(EventMessage::error("A batch is already running"));
    }

    let state = state.clone();
    tokio::spawn(async move {
        let dispatcher = Dispatcher::new(
            state.page.clone(),
            state.config.typing,
            state.config.search_settle(),
        );
        let liveness = PageLiveness::new(state.page.clone());
        let runner = BatchRunner::new(&dispatcher, &liveness, &state.history, &state.events);
        let summary = runner.run(&data).await;
        tracing::info!(
            sent = summary.sent,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        state.batch_running.store(false, Ordering::SeqCst);
    });
    None
}
