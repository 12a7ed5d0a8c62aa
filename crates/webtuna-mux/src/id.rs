use webtuna_frame::{StreamId, FIRST_STREAM_ID};

/// Hands out stream ids for locally accepted sockets.
///
/// One allocator lives alongside one [`StreamTable`](crate::StreamTable),
/// so a fresh Channel always starts numbering from [`FIRST_STREAM_ID`].
#[derive(Debug)]
pub struct IdAllocator {
    next: StreamId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: FIRST_STREAM_ID,
        }
    }

    /// Take the next id.
    pub fn allocate(&mut self) -> StreamId {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        id
    }

    /// The id the next call to [`allocate`](Self::allocate) returns.
    pub fn peek(&self) -> StreamId {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
