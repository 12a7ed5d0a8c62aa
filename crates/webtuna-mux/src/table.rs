use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use webtuna_frame::StreamId;

/// Identity of one dial or accept attempt within a [`StreamTable`].
///
/// Every resolution and socket event carries the attempt it belongs to;
/// an event whose attempt no longer matches the table entry is stale.
pub type AttemptId = u64;

/// Write side of an open stream.
///
/// Dropping the handle closes the local socket once every queued write
/// has been flushed.
#[derive(Debug)]
pub struct StreamHandle {
    writer: mpsc::UnboundedSender<Bytes>,
}

impl StreamHandle {
    pub(crate) fn new(writer: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { writer }
    }

    /// Queue a payload for the local socket.
    ///
    /// Returns `false` if the socket is already gone.
    pub fn write(&self, payload: Bytes) -> bool {
        self.writer.send(payload).is_ok()
    }
}

/// One stream id's slot in the table.
#[derive(Debug)]
pub enum Entry {
    /// A local dial or accept is in flight.
    Pending {
        attempt: AttemptId,
        /// Payloads received while the socket was not yet open, in order.
        queued: Vec<Bytes>,
        /// The remote side ended the stream before the socket opened.
        closing: bool,
    },
    /// The local socket is open.
    Ready {
        attempt: AttemptId,
        stream: StreamHandle,
    },
}

impl Entry {
    pub fn attempt(&self) -> AttemptId {
        match self {
            Entry::Pending { attempt, .. } | Entry::Ready { attempt, .. } => *attempt,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending { .. })
    }
}

/// Outcome of resolving a pending entry with an open socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The entry is now ready; `flushed` queued payloads were written.
    Opened { flushed: usize },
    /// Queued payloads were written and the entry removed, because the
    /// remote side had already ended the stream.
    Closed { flushed: usize },
    /// The entry was removed or replaced while the attempt was in flight.
    Stale,
}

/// Live mapping from stream id to stream for one Channel.
#[derive(Debug, Default)]
pub struct StreamTable {
    entries: HashMap<StreamId, Entry>,
    next_attempt: AttemptId,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, pending ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    /// Register a new pending attempt under `id`.
    ///
    /// Any existing entry for `id` is superseded and returned; its
    /// in-flight resolution will be reported as [`Resolution::Stale`].
    pub fn begin(&mut self, id: StreamId) -> (AttemptId, Option<Entry>) {
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let replaced = self.entries.insert(
            id,
            Entry::Pending {
                attempt,
                queued: Vec::new(),
                closing: false,
            },
        );
        (attempt, replaced)
    }

    /// Whether `attempt` is the current entry for `id`.
    pub fn is_current(&self, id: StreamId, attempt: AttemptId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.attempt() == attempt)
    }

    /// Whether `attempt` is the current entry for `id` and still pending.
    pub fn is_pending(&self, id: StreamId, attempt: AttemptId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.is_pending() && entry.attempt() == attempt)
    }

    /// Promote a pending attempt to an open stream.
    ///
    /// Queued payloads are handed to the stream in arrival order. When the
    /// attempt is stale the handle is dropped, which closes its socket.
    pub fn resolve(&mut self, id: StreamId, attempt: AttemptId, stream: StreamHandle) -> Resolution {
        if !self.is_pending(id, attempt) {
            return Resolution::Stale;
        }
        let Some(Entry::Pending {
            queued, closing, ..
        }) = self.entries.remove(&id)
        else {
            return Resolution::Stale;
        };

        let flushed = queued.len();
        for payload in queued {
            stream.write(payload);
        }

        if closing {
            Resolution::Closed { flushed }
        } else {
            self.entries.insert(id, Entry::Ready { attempt, stream });
            Resolution::Opened { flushed }
        }
    }

    /// Remove `id` only if `attempt` is still its current entry.
    pub fn remove_if_current(&mut self, id: StreamId, attempt: AttemptId) -> Option<Entry> {
        if self.is_current(id, attempt) {
            self.entries.remove(&id)
        } else {
            None
        }
    }

    /// Remove `id` unconditionally.
    pub fn remove(&mut self, id: StreamId) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Drop every entry, closing each open socket once. Returns how many
    /// entries were live.
    pub fn clear(&mut self) -> usize {
        let live = self.entries.len();
        self.entries.clear();
        live
    }
}
