// WebSocket server exposing the ledger operations to remote callers.
//
// Each accepted connection gets its own task. Requests from every connection
// funnel into the same `LedgerHandle`, so the ledger actor sees them as one
// ordered stream. Replies and broadcast pushes for a connection are queued on
// an mpsc channel and written by a dedicated writer task.

use anyhow::Context;
use billsplit_app::{dispatch, update_message, AppError, LedgerHandle, LedgerUpdate};
use billsplit_core::protocol::{peek_request_id, ClientMessage, ServerMessage};
use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Outgoing frames buffered per connection before the reader waits.
const OUTBOUND_BUFFER: usize = 64;

/// Bind the TCP listener for the WebSocket server.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket server on {addr}"))
}

/// Accept connections forever, serving each on its own task.
///
/// Returns only if accepting fails; cancel the task to stop the server.
pub async fn run(listener: TcpListener, handle: LedgerHandle) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        debug!("Accepted TCP connection from {addr_str}");

        let handle = handle.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => serve_connection(ws, handle, addr_str).await,
                Err(e) => warn!("WebSocket handshake failed for {addr_str}: {e}"),
            }
        });
    }
}

/// Serve one WebSocket connection until the client closes it.
pub async fn serve_connection<S>(ws: WebSocketStream<S>, handle: LedgerHandle, addr: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!("Client {addr} connected");

    let (write, read) = ws.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);

    let writer = tokio::spawn(write_messages(write, out_rx, addr.clone()));
    let forwarder = handle
        .subscribe()
        .map(|updates| tokio::spawn(forward_updates(updates, out_tx.clone(), addr.clone())));

    let _ = process_message_stream(read, &handle, &out_tx, &addr).await;

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(out_tx);
    let _ = writer.await;

    info!("Client {addr} disconnected");
}

/// Read frames from `stream`, answer each text frame through `out_tx`.
///
/// Returns `Err(())` when the outbound channel is closed or the ledger actor
/// has stopped, signalling the caller to drop the connection.
pub async fn process_message_stream<St>(
    mut stream: St,
    handle: &LedgerHandle,
    out_tx: &mpsc::Sender<Message>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let (reply, actor_gone) = match handle_text(handle, text.as_str()).await {
                    Ok(reply) => (reply, false),
                    Err(e) => {
                        warn!("Request from {addr} failed: {e}");
                        let request_id = peek_request_id(text.as_str());
                        (ServerMessage::error(request_id, e.to_string()), true)
                    }
                };
                let frame = match reply.to_json() {
                    Ok(json) => Some(Message::Text(json.into())),
                    Err(e) => {
                        warn!("Reply to {addr} could not be encoded: {e}");
                        let request_id = peek_request_id(text.as_str());
                        encode(&ServerMessage::error(request_id, e.to_string()))
                    }
                };
                if let Some(frame) = frame {
                    if out_tx.send(frame).await.is_err() {
                        return Err(());
                    }
                }
                if actor_gone {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

/// Decode one request and run it. Malformed requests get an `ERROR` reply.
async fn handle_text(handle: &LedgerHandle, text: &str) -> Result<ServerMessage, AppError> {
    match ClientMessage::parse(text) {
        Ok(msg) => dispatch(handle, msg).await,
        Err(e) => {
            warn!("Rejecting malformed request: {e}");
            Ok(ServerMessage::error(peek_request_id(text), e.to_string()))
        }
    }
}

/// Push every ledger update to one connection until it goes away.
pub async fn forward_updates(
    mut updates: broadcast::Receiver<LedgerUpdate>,
    out_tx: mpsc::Sender<Message>,
    addr: String,
) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                let Some(frame) = encode(&update_message(update)) else {
                    continue;
                };
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Client {addr} lagged, skipped {skipped} ledger updates");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Drain `out_rx` into the socket's write half, then close it.
async fn write_messages<Si>(mut sink: Si, mut out_rx: mpsc::Receiver<Message>, addr: String)
where
    Si: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    while let Some(frame) = out_rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!("Failed to write to {addr}: {e}");
            return;
        }
    }
    let _ = sink.close().await;
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match msg.to_json() {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Dropping message: {e}");
            None
        }
    }
}
