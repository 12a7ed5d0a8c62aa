use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};
use webtuna_frame::{is_control, Envelope, Frame, FrameError, StreamId, TunaCodec};
use webtuna_transport::LocalStream;

use crate::dialer::{DialFuture, Dialer};
use crate::error::{MuxError, Result};
use crate::pump;
use crate::table::{AttemptId, Entry, Resolution, StreamTable};

/// Everything the multiplexer task reacts to besides inbound frames.
pub(crate) enum Event<S> {
    /// A dial or accept attempt finished.
    Resolved {
        id: StreamId,
        attempt: AttemptId,
        result: io::Result<S>,
    },
    /// Bytes read from a local socket.
    SocketData {
        id: StreamId,
        attempt: AttemptId,
        payload: Bytes,
    },
    /// A local socket reached end of stream (or failed).
    SocketEnd { id: StreamId, attempt: AttemptId },
    /// A locally accepted socket to register under a caller-chosen id.
    Register { id: StreamId, socket: DialFuture<S> },
    /// Diagnostic query for the number of live entries.
    LiveStreams { reply: oneshot::Sender<usize> },
    /// The Channel's write half failed.
    ChannelFailed(FrameError),
}

/// Relays bytes between local sockets and Frames on one Channel.
///
/// The multiplexer is an actor: [`run`](Self::run) owns the
/// [`StreamTable`] and is the only code that mutates it. It returns once
/// the Channel ends, after every stream on it has been torn down.
pub struct ChannelMultiplexer<C, S> {
    inbound: SplitStream<Framed<C, TunaCodec>>,
    sink: SplitSink<Framed<C, TunaCodec>, Frame>,
    table: StreamTable,
    events_tx: mpsc::UnboundedSender<Event<S>>,
    events_rx: mpsc::UnboundedReceiver<Event<S>>,
    dialer: Option<Arc<dyn Dialer<S>>>,
}

/// Cloneable handle for feeding locally accepted sockets into a running
/// [`ChannelMultiplexer`].
pub struct MuxHandle<S> {
    events: mpsc::UnboundedSender<Event<S>>,
}

impl<S> Clone for MuxHandle<S> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<S: LocalStream> MuxHandle<S> {
    /// Register a stream under `id` whose socket is still being opened.
    ///
    /// The entry is pending until `socket` resolves; a failed resolution
    /// discards it.
    pub fn register_outbound<F>(&self, id: StreamId, socket: F) -> Result<()>
    where
        F: Future<Output = io::Result<S>> + Send + 'static,
    {
        self.events
            .send(Event::Register {
                id,
                socket: Box::pin(socket),
            })
            .map_err(|_| MuxError::Closed)
    }

    /// Register an already-open socket under `id`.
    pub fn register_socket(&self, id: StreamId, socket: S) -> Result<()> {
        self.register_outbound(id, std::future::ready(Ok(socket)))
    }

    /// Number of live entries, pending ones included.
    pub async fn live_streams(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::LiveStreams { reply })
            .map_err(|_| MuxError::Closed)?;
        rx.await.map_err(|_| MuxError::Closed)
    }

    /// Whether the multiplexer has finished.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

impl<C, S> ChannelMultiplexer<C, S>
where
    C: LocalStream,
    S: LocalStream,
{
    /// Multiplexer for the receiving side: streams are only created by
    /// [`MuxHandle::register_outbound`]; frames for unknown ids are dropped.
    pub fn new(channel: Framed<C, TunaCodec>) -> (Self, MuxHandle<S>) {
        Self::build(channel, None)
    }

    /// Multiplexer for the exposing side: the first frame for an unknown
    /// id dials a new local socket through `dialer`.
    pub fn with_dialer(
        channel: Framed<C, TunaCodec>,
        dialer: impl Dialer<S>,
    ) -> (Self, MuxHandle<S>) {
        Self::build(channel, Some(Arc::new(dialer)))
    }

    fn build(
        channel: Framed<C, TunaCodec>,
        dialer: Option<Arc<dyn Dialer<S>>>,
    ) -> (Self, MuxHandle<S>) {
        let (sink, inbound) = channel.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = MuxHandle {
            events: events_tx.clone(),
        };
        let mux = Self {
            inbound,
            sink,
            table: StreamTable::new(),
            events_tx,
            events_rx,
            dialer,
        };
        (mux, handle)
    }

    /// Drive the Channel until it ends.
    ///
    /// Returns `Ok(())` when the remote side closed the Channel cleanly and
    /// `Err(MuxError::Channel)` when it failed. Either way every stream has
    /// been closed when this returns.
    pub async fn run(mut self) -> Result<()> {
        let (outbound, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_channel(self.sink, queue, self.events_tx.clone()));

        let result = loop {
            tokio::select! {
                inbound = self.inbound.next() => match inbound {
                    Some(Ok(envelope)) => on_envelope(
                        &mut self.table,
                        self.dialer.as_ref(),
                        &self.events_tx,
                        envelope,
                    ),
                    Some(Err(err)) => break Err(MuxError::Channel(err)),
                    None => break Ok(()),
                },
                Some(event) = self.events_rx.recv() => {
                    if let Err(err) = on_event(&mut self.table, &self.events_tx, &outbound, event) {
                        break Err(err);
                    }
                }
            }
        };

        let live = self.table.clear();
        info!(streams = live, "closing all sockets");

        result
    }
}

/// Forwards outbound frames to the Channel so the multiplexer never waits
/// on a slow peer.
async fn write_channel<C, S>(
    mut sink: SplitSink<Framed<C, TunaCodec>, Frame>,
    mut queue: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<Event<S>>,
) where
    C: LocalStream,
{
    while let Some(frame) = queue.recv().await {
        if let Err(err) = sink.feed(frame).await {
            let _ = events.send(Event::ChannelFailed(err));
            return;
        }
        // Batch whatever is already queued before flushing.
        while let Ok(frame) = queue.try_recv() {
            if let Err(err) = sink.feed(frame).await {
                let _ = events.send(Event::ChannelFailed(err));
                return;
            }
        }
        if let Err(err) = sink.flush().await {
            let _ = events.send(Event::ChannelFailed(err));
            return;
        }
    }
    let _ = sink.close().await;
}

fn on_envelope<S: LocalStream>(
    table: &mut StreamTable,
    dialer: Option<&Arc<dyn Dialer<S>>>,
    events: &mpsc::UnboundedSender<Event<S>>,
    envelope: Envelope,
) {
    let frame = match envelope.frame() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, size = envelope.body.len(), "ignoring invalid data");
            return;
        }
    };

    if is_control(frame.id()) {
        warn!(stream_id = frame.id(), "ignoring frame on reserved control stream");
        return;
    }

    match frame {
        Frame::Data { id, payload } => on_remote_data(table, dialer, events, id, payload),
        Frame::Close { id } => on_remote_close(table, dialer, events, id),
    }
}

fn on_remote_data<S: LocalStream>(
    table: &mut StreamTable,
    dialer: Option<&Arc<dyn Dialer<S>>>,
    events: &mpsc::UnboundedSender<Event<S>>,
    id: StreamId,
    payload: Bytes,
) {
    trace!(stream_id = id, size = payload.len(), "channel data");

    match table.get_mut(id) {
        Some(Entry::Ready { stream, .. }) => {
            if !stream.write(payload) {
                debug!(stream_id = id, "dropping data for released socket");
            }
        }
        Some(Entry::Pending {
            queued, closing, ..
        }) => {
            if *closing {
                debug!(stream_id = id, "dropping data after remote close");
            } else {
                queued.push(payload);
            }
        }
        None => {
            let Some(dialer) = dialer else {
                debug!(stream_id = id, "dropping data for unknown stream");
                return;
            };
            let (attempt, _) = table.begin(id);
            if let Some(Entry::Pending { queued, .. }) = table.get_mut(id) {
                queued.push(payload);
            }
            spawn_resolution(events, id, attempt, dialer.dial(id));
        }
    }
}

fn on_remote_close<S: LocalStream>(
    table: &mut StreamTable,
    dialer: Option<&Arc<dyn Dialer<S>>>,
    events: &mpsc::UnboundedSender<Event<S>>,
    id: StreamId,
) {
    match table.get_mut(id) {
        Some(Entry::Pending { closing, .. }) => {
            *closing = true;
        }
        Some(Entry::Ready { .. }) => {
            table.remove(id);
            debug!(stream_id = id, "socket closed by remote side");
        }
        None => {
            let Some(dialer) = dialer else {
                debug!(stream_id = id, "ignoring close for unknown stream");
                return;
            };
            // The local service still sees a connect followed by an end.
            let (attempt, _) = table.begin(id);
            if let Some(Entry::Pending { closing, .. }) = table.get_mut(id) {
                *closing = true;
            }
            spawn_resolution(events, id, attempt, dialer.dial(id));
        }
    }
}

fn on_event<S: LocalStream>(
    table: &mut StreamTable,
    events: &mpsc::UnboundedSender<Event<S>>,
    outbound: &mpsc::UnboundedSender<Frame>,
    event: Event<S>,
) -> Result<()> {
    match event {
        Event::Resolved {
            id,
            attempt,
            result: Ok(socket),
        } => {
            if !table.is_pending(id, attempt) {
                debug!(stream_id = id, attempt, "discarding stale socket");
                return Ok(());
            }
            let stream = pump::spawn(id, attempt, socket, events.clone());
            match table.resolve(id, attempt, stream) {
                Resolution::Opened { flushed } => {
                    debug!(stream_id = id, attempt, flushed, "stream opened");
                }
                Resolution::Closed { flushed } => {
                    debug!(stream_id = id, attempt, flushed, "stream closed by remote side before open");
                }
                Resolution::Stale => {
                    debug!(stream_id = id, attempt, "discarding stale socket");
                }
            }
        }
        Event::Resolved {
            id,
            attempt,
            result: Err(err),
        } => {
            warn!(stream_id = id, attempt, error = %err, "local connection failed");
            table.remove_if_current(id, attempt);
        }
        Event::SocketData {
            id,
            attempt,
            payload,
        } => {
            if table.is_current(id, attempt) {
                let _ = outbound.send(Frame::Data { id, payload });
            }
        }
        Event::SocketEnd { id, attempt } => {
            if table.remove_if_current(id, attempt).is_some() {
                let _ = outbound.send(Frame::Close { id });
                debug!(stream_id = id, "socket closed");
            }
        }
        Event::Register { id, socket } => {
            let (attempt, replaced) = table.begin(id);
            if replaced.is_some() {
                warn!(stream_id = id, "registration replaced a live stream");
            }
            debug!(stream_id = id, attempt, "new incoming connection");
            spawn_resolution(events, id, attempt, socket);
        }
        Event::LiveStreams { reply } => {
            let _ = reply.send(table.len());
        }
        Event::ChannelFailed(err) => return Err(MuxError::Channel(err)),
    }
    Ok(())
}

fn spawn_resolution<S: LocalStream>(
    events: &mpsc::UnboundedSender<Event<S>>,
    id: StreamId,
    attempt: AttemptId,
    socket: DialFuture<S>,
) {
    let events = events.clone();
    tokio::spawn(async move {
        let result = socket.await;
        let _ = events.send(Event::Resolved {
            id,
            attempt,
            result,
        });
    });
}
