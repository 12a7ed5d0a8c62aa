use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};
use webtuna_frame::StreamId;
use webtuna_transport::LocalStream;

use crate::multiplexer::Event;
use crate::table::{AttemptId, StreamHandle};

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Split an opened socket into its read and write pumps.
pub(crate) fn spawn<S: LocalStream>(
    id: StreamId,
    attempt: AttemptId,
    socket: S,
    events: mpsc::UnboundedSender<Event<S>>,
) -> StreamHandle {
    let (read_half, write_half) = tokio::io::split(socket);
    let reader = tokio::spawn(read_pump(id, attempt, read_half, events));

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_pump(id, write_half, rx, reader.abort_handle()));

    StreamHandle::new(tx)
}

async fn read_pump<R, S>(
    id: StreamId,
    attempt: AttemptId,
    mut reader: R,
    events: mpsc::UnboundedSender<Event<S>>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        buf.reserve(READ_CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                trace!(stream_id = id, size = n, "local socket data");
                let payload = buf.split().freeze();
                if events
                    .send(Event::SocketData {
                        id,
                        attempt,
                        payload,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                debug!(stream_id = id, error = %err, "local socket error, treating as end");
                break;
            }
        }
    }
    let _ = events.send(Event::SocketEnd { id, attempt });
}

/// Drains queued payloads into the socket. When the queue closes (the
/// table entry is gone) the write half is shut down and the read pump
/// stopped.
async fn write_pump<W>(
    id: StreamId,
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    reader: AbortHandle,
) where
    W: AsyncWrite + Unpin,
{
    let mut broken = false;
    while let Some(payload) = queue.recv().await {
        if broken {
            continue;
        }
        if let Err(err) = writer.write_all(&payload).await {
            debug!(stream_id = id, error = %err, "local socket write failed");
            broken = true;
        }
    }

    if !broken {
        let _ = writer.flush().await;
        let _ = writer.shutdown().await;
    }
    reader.abort();
    trace!(stream_id = id, "local socket released");
}
