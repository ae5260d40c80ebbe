use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::market_data::connection::{TaggedEvent, Transport, TransportEvent, TransportHandle};

/// WebSocket transport for the dashboard stream.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Transport for WsTransport {
    fn open(&self, generation: u64, events: mpsc::UnboundedSender<TaggedEvent>) -> TransportHandle {
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_socket(self.url.clone(), generation, events, close_rx));
        TransportHandle::new(close_tx, task)
    }
}

fn emit(events: &mpsc::UnboundedSender<TaggedEvent>, generation: u64, event: TransportEvent) {
    // receiver only goes away on shutdown
    let _ = events.send((generation, event));
}

async fn run_socket(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<TaggedEvent>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let ws_stream = tokio::select! {
        _ = &mut close_rx => return,
        res = connect_async(url.as_str()) => match res {
            Ok((ws_stream, resp)) => {
                info!(generation, status = %resp.status(), "stream connected");
                ws_stream
            }
            Err(err) => {
                warn!(generation, error = %err, "stream connect failed");
                emit(&events, generation, TransportEvent::Error(err.to_string()));
                emit(&events, generation, TransportEvent::Closed);
                return;
            }
        },
    };

    emit(&events, generation, TransportEvent::Opened);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = write.send(Message::Close(None)).await;
                debug!(generation, "stream closed locally");
                return;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    emit(&events, generation, TransportEvent::Frame(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => emit(&events, generation, TransportEvent::Frame(text)),
                    Err(_) => debug!(generation, "ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(generation, ?frame, "stream closed by peer");
                    emit(&events, generation, TransportEvent::Closed);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(generation, error = %err, "stream error");
                    emit(&events, generation, TransportEvent::Error(err.to_string()));
                    emit(&events, generation, TransportEvent::Closed);
                    return;
                }
                None => {
                    emit(&events, generation, TransportEvent::Closed);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bad_endpoint_reports_error_then_close() {
        let transport = WsTransport::new("http://not a websocket url");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = transport.open(7, tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.0, 7);
        assert!(matches!(first.1, TransportEvent::Error(_)));
        assert_eq!(rx.recv().await, Some((7, TransportEvent::Closed)));

        handle.close().await;
    }
}
