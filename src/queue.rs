/// FIFO of serialized requests waiting for the socket to become writable.
///
/// Entries are never reordered or merged. A partially written entry keeps its
/// place at the front with the sent prefix cut off.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: std::collections::VecDeque<bytes::BytesMut>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push_back(&mut self, entry: bytes::BytesMut) {
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.entries.iter().map(bytes::BytesMut::len).sum()
    }

    pub fn front(&self) -> Option<&[u8]> {
        self.entries.front().map(|entry| &entry[..])
    }

    /// Writes as much as `write` accepts, front first.
    ///
    /// `write` is a non-blocking write returning the number of bytes taken,
    /// with 0 meaning the socket would block. Returns the total written.
    pub fn drain<W>(&mut self, mut write: W) -> std::io::Result<usize>
    where
        W: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        let mut total = 0;

        while let Some(entry) = self.entries.front_mut() {
            let written = write(&entry[..])?;

            if written == 0 {
                break;
            }

            total += written;

            if written < entry.len() {
                tracing::trace!(written, remaining = entry.len() - written, "partial write");
                bytes::Buf::advance(entry, written);
            }
            else {
                self.entries.pop_front();
            }
        }

        Ok(total)
    }
}
