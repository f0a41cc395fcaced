//! WebSocket Server and Session Loop
//!
//! Accepts connections and runs one strictly sequential session loop per
//! connection: receive one request envelope, run the frame pipeline, send
//! the response, repeat. Per-frame failures never end a session; only a
//! malformed envelope, a client disconnect, or a transport error does.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{EnvelopeError, FrameRequest};
use crate::vision::FramePipeline;

/// Bind the listener and serve connections until the process exits.
///
/// Connections are independent: each gets its own task and session state;
/// the only shared state is the pipeline's capability handles.
pub async fn run(addr: &str, pipeline: Arc<FramePipeline>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening for frame streams on ws://{}", addr);

    serve(listener, pipeline).await
}

async fn serve(listener: TcpListener, pipeline: Arc<FramePipeline>) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("Failed to accept connection")?;

        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let session_id = Uuid::new_v4();
            info!("Session {} opened from {}", session_id, peer);

            match run_session(stream, pipeline, session_id).await {
                Ok(()) => info!("Session {} closed", session_id),
                Err(e) => warn!("Session {} ended with transport error: {:#}", session_id, e),
            }
        });
    }
}

/// Run one session from WebSocket handshake to the Closed state.
async fn run_session(
    stream: TcpStream,
    pipeline: Arc<FramePipeline>,
    session_id: Uuid,
) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;

    while let Some(message) = ws.next().await {
        let message = message.context("Receive failed")?;

        match message {
            Message::Text(text) => match process_frame_message(&pipeline, &text) {
                Ok(Some(response)) => {
                    ws.send(Message::Text(response))
                        .await
                        .context("Send failed")?;
                }
                // Frame silently dropped: send nothing, await the next request
                Ok(None) => {}
                Err(e) => {
                    // The envelope is the minimal unit of synchronization;
                    // close rather than attempt partial recovery.
                    warn!("Session {}: closing on {}", session_id, e);
                    ws.close(None).await.ok();
                    break;
                }
            },
            // The protocol carries text envelopes only
            Message::Binary(_) => {
                warn!("Session {}: closing on unexpected binary message", session_id);
                ws.close(None).await.ok();
                break;
            }
            // Client disconnect is normal termination, not an error
            Message::Close(_) => break,
            // Ping/pong are answered by the protocol layer
            _ => debug!("Session {}: ignoring control message", session_id),
        }
    }

    Ok(())
}

/// Handle one request envelope.
///
/// `Ok(Some(json))` is a response to send, `Ok(None)` a silently dropped
/// frame, `Err` a malformed envelope that closes the session.
fn process_frame_message(
    pipeline: &FramePipeline,
    text: &str,
) -> Result<Option<String>, EnvelopeError> {
    let request = FrameRequest::parse(text)?;
    let image_bytes = request.image_bytes()?;

    let response = pipeline.process(&image_bytes, request.timestamp);

    Ok(response.and_then(|r| match serde_json::to_string(&r) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Dropping response that failed to serialize: {}", e);
            None
        }
    }))
}
