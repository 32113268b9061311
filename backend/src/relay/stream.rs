//! Line-by-line relay of an agent event stream

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Lines read ahead of a slow caller
const LINE_BUFFER: usize = 32;

/// Raw agent lines, newline included, in arrival order.
///
/// Dropping the stream cancels its pump task, which closes the agent
/// connection.
#[derive(Debug)]
pub struct RelayStream {
    lines: ReceiverStream<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl RelayStream {
    pub(super) fn spawn(node_id: &str, response: reqwest::Response, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        tokio::spawn(pump(node_id.to_string(), response, tx, cancel.clone()));

        Self {
            lines: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

impl Stream for RelayStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.lines).poll_next(cx)
    }
}

async fn pump(
    node_id: String,
    response: reqwest::Response,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) {
    let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
    let mut reader = BufReader::new(StreamReader::new(body));
    let mut forwarded = 0usize;

    loop {
        let mut line = Vec::new();
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(node_id = %node_id, "Caller left, closing agent stream");
                break;
            }
            read = reader.read_until(b'\n', &mut line) => read,
        };

        match read {
            Ok(0) => {
                debug!(node_id = %node_id, "Agent closed event stream");
                break;
            }
            Ok(_) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(Bytes::from(line)) => {
                        if sent.is_err() {
                            break;
                        }
                        forwarded += 1;
                    }
                }
            }
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Agent event stream failed");
                break;
            }
        }
    }

    debug!(node_id = %node_id, lines = forwarded, "Event stream relay finished");
}
