//! Transports carrying MCP messages between the host and [`McpServer`].
//!
//! * stdio: one JSON-RPC message per line on stdin, replies one per line on stdout.
//! * SSE: `GET /sse` opens an event stream announcing a per-session POST
//!   endpoint; messages POSTed there are answered on the stream.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::calendly::CalendlyApi;
use crate::mcp::{error_codes, JsonRpcResponse, McpServer};

/// Replies queued per connection before handler tasks wait
const REPLY_BUFFER: usize = 64;

/// Longest stdio message accepted; longer lines are skipped with a parse error
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages/";

/// Serve MCP over the process's stdin/stdout until stdin closes.
pub async fn serve_stdio<A: CalendlyApi + 'static>(server: Arc<McpServer<A>>) -> Result<()> {
    info!("Listening for MCP messages on stdin");
    let mut stdout = tokio::io::stdout();
    serve_lines(server, tokio::io::stdin(), &mut stdout).await
}

/// Line-delimited JSON-RPC loop over any reader/writer pair.
///
/// Every message is handled on its own task; a single writer serializes the
/// replies so lines never interleave.
pub async fn serve_lines<A, R, W>(server: Arc<McpServer<A>>, reader: R, writer: &mut W) -> Result<()>
where
    A: CalendlyApi + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(REPLY_BUFFER);

    let read_loop = async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let limit = MAX_MESSAGE_BYTES as u64 + 1;
            let n = (&mut reader)
                .take(limit)
                .read_until(b'\n', &mut buf)
                .await
                .context("Failed to read message")?;
            if n == 0 {
                break;
            }

            if buf.len() > MAX_MESSAGE_BYTES && buf.last() != Some(&b'\n') {
                skip_line(&mut reader).await.context("Failed to read message")?;
                warn!("Discarding message longer than {} bytes", MAX_MESSAGE_BYTES);
                let reply = JsonRpcResponse::error(
                    Value::Null,
                    error_codes::PARSE_ERROR,
                    &format!("parse error: message exceeds {MAX_MESSAGE_BYTES} bytes"),
                );
                let _ = tx.send(reply).await;
                continue;
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim().to_string(),
                Err(e) => {
                    warn!("Discarding message that is not UTF-8: {}", e);
                    let reply = JsonRpcResponse::error(
                        Value::Null,
                        error_codes::PARSE_ERROR,
                        "parse error: message is not valid UTF-8",
                    );
                    let _ = tx.send(reply).await;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let server = Arc::clone(&server);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(reply) = server.handle_message(&line).await {
                    if tx.send(reply).await.is_err() {
                        warn!("Reply dropped, output already closed");
                    }
                }
            });
        }
        info!("Input closed, shutting down");
        anyhow::Ok(())
    };

    let write_loop = async {
        while let Some(reply) = rx.recv().await {
            let mut line = serde_json::to_vec(&reply).context("Failed to serialize reply")?;
            line.push(b'\n');
            writer.write_all(&line).await.context("Failed to write reply")?;
            writer.flush().await.context("Failed to flush reply")?;
        }
        anyhow::Ok(())
    };

    let (read, write) = tokio::join!(read_loop, write_loop);
    read?;
    write
}

/// Consume input up to and including the next newline.
async fn skip_line<B: AsyncBufRead + Unpin>(reader: &mut B) -> std::io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

struct SseState<A> {
    server: Arc<McpServer<A>>,
    sessions: RwLock<HashMap<Uuid, mpsc::Sender<JsonRpcResponse>>>,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

/// Routes of the SSE transport
pub fn sse_router<A: CalendlyApi + 'static>(server: Arc<McpServer<A>>) -> Router {
    let state = Arc::new(SseState {
        server,
        sessions: RwLock::new(HashMap::new()),
    });

    Router::new()
        .route(SSE_PATH, get(open_stream::<A>))
        .route(MESSAGES_PATH, post(post_message::<A>))
        .route("/messages", post(post_message::<A>))
        .with_state(state)
}

/// Serve MCP over HTTP with server-sent events on `bind`.
pub async fn serve_sse<A: CalendlyApi + 'static>(server: Arc<McpServer<A>>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!("SSE transport listening on http://{}{}", addr, SSE_PATH);

    axum::serve(listener, sse_router(server))
        .await
        .context("SSE server failed")?;
    Ok(())
}

async fn open_stream<A: CalendlyApi + 'static>(
    State(state): State<Arc<SseState<A>>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(REPLY_BUFFER);

    {
        let mut sessions = state.sessions.write().await;
        sessions.retain(|_, sender| !sender.is_closed());
        sessions.insert(session_id, tx);
        info!("SSE session {} opened ({} active)", session_id, sessions.len());
    }

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?session_id={}", MESSAGES_PATH, session_id.simple()));

    let replies = ReceiverStream::new(rx).filter_map(|reply: JsonRpcResponse| {
        match Event::default().event("message").json_data(&reply) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                error!("Failed to encode reply for SSE: {}", e);
                None
            }
        }
    });

    let stream = tokio_stream::once(Ok::<_, Infallible>(endpoint)).chain(replies);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn post_message<A: CalendlyApi + 'static>(
    State(state): State<Arc<SseState<A>>>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> StatusCode {
    let Ok(session_id) = Uuid::parse_str(&query.session_id) else {
        return StatusCode::BAD_REQUEST;
    };

    let Some(tx) = state.sessions.read().await.get(&session_id).cloned() else {
        warn!("Message for unknown SSE session {}", session_id);
        return StatusCode::NOT_FOUND;
    };
    if tx.is_closed() {
        state.sessions.write().await.remove(&session_id);
        info!("SSE session {} closed", session_id);
        return StatusCode::NOT_FOUND;
    }

    let message: Value = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!("Rejecting malformed message for session {}: {}", session_id, e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let server = Arc::clone(&state.server);
    tokio::spawn(async move {
        if let Some(reply) = server.handle_value(message).await {
            if tx.send(reply).await.is_err() {
                warn!("SSE session {} closed before reply", session_id);
            }
        }
    });

    StatusCode::ACCEPTED
}
