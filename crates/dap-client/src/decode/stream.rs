//! Byte sources and marker search for DAP response bodies.

use bytes::{Bytes, BytesMut};

use dap_common::{DapError, DapResult};

/// Separator between the DDS and the XDR payload of a `.dods` response.
pub const DODS_SEPARATOR: &[u8] = b"\nData:\n";

/// Marker searched for when streaming a sequence.
pub const DATA_MARKER: &[u8] = b"Data:\n";

/// A source of bytes exposing only `read(n)`.
///
/// `read` returns fewer than `n` bytes only when the source is exhausted.
pub trait ByteSource {
    fn read(&mut self, n: usize) -> DapResult<Bytes>;

    /// Read exactly `n` bytes or fail with a decode error naming `what`.
    fn read_exact(&mut self, n: usize, what: &str) -> DapResult<Bytes> {
        let bytes = self.read(n)?;
        if bytes.len() < n {
            return Err(DapError::decode(format!(
                "unexpected end of data reading {}: wanted {} bytes, got {}",
                what,
                n,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Read a big-endian `u32`.
    fn read_u32(&mut self, what: &str) -> DapResult<u32> {
        let bytes = self.read_exact(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Discard `n` bytes.
    fn skip(&mut self, n: usize) -> DapResult<()> {
        if n > 0 {
            self.read(n)?;
        }
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, n: usize) -> DapResult<Bytes> {
        (**self).read(n)
    }
}

/// Reads from an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesReader {
    data: Bytes,
}

impl BytesReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl ByteSource for BytesReader {
    fn read(&mut self, n: usize) -> DapResult<Bytes> {
        let take = n.min(self.data.len());
        Ok(self.data.split_to(take))
    }
}

/// Reads from an iterator of chunks, pulling only as many as needed.
pub struct StreamReader<I> {
    chunks: I,
    buf: BytesMut,
}

impl<I> StreamReader<I>
where
    I: Iterator<Item = DapResult<Bytes>>,
{
    pub fn new(chunks: I) -> Self {
        Self {
            chunks,
            buf: BytesMut::new(),
        }
    }
}

impl<I> ByteSource for StreamReader<I>
where
    I: Iterator<Item = DapResult<Bytes>>,
{
    fn read(&mut self, n: usize) -> DapResult<Bytes> {
        while self.buf.len() < n {
            match self.chunks.next() {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None => break,
            }
        }
        let take = n.min(self.buf.len());
        Ok(self.buf.split_to(take).freeze())
    }
}

/// Incremental search for a byte pattern across chunk boundaries.
///
/// Between chunks only the last `pattern.len() - 1` bytes are kept, which is
/// enough to catch a pattern split over two chunks.
#[derive(Debug, Clone)]
pub struct MarkerSearch<'p> {
    pattern: &'p [u8],
    tail: Vec<u8>,
}

impl<'p> MarkerSearch<'p> {
    pub fn new(pattern: &'p [u8]) -> Self {
        Self {
            pattern,
            tail: Vec::new(),
        }
    }

    /// Scan the next chunk. Returns the bytes following the marker once it
    /// has been found.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<Bytes> {
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);

        if let Some(pos) = find(&window, self.pattern) {
            return Some(Bytes::copy_from_slice(&window[pos + self.pattern.len()..]));
        }

        let keep = self.pattern.len().saturating_sub(1).min(window.len());
        self.tail = window.split_off(window.len() - keep);
        None
    }
}

/// Consume chunks until `pattern` is seen and return what follows it in the
/// chunk where it ended. `None` means the stream ended first.
pub fn find_marker<I>(pattern: &[u8], chunks: &mut I) -> DapResult<Option<Bytes>>
where
    I: Iterator<Item = DapResult<Bytes>>,
{
    let mut search = MarkerSearch::new(pattern);
    for chunk in chunks {
        if let Some(rest) = search.feed(&chunk?) {
            return Ok(Some(rest));
        }
    }
    Ok(None)
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a `.dods` body into DDS text and XDR payload.
pub fn split_dods(raw: &[u8]) -> DapResult<(&[u8], &[u8])> {
    let pos = find(raw, DODS_SEPARATOR).ok_or_else(|| {
        DapError::MalformedResponse("could not find the data segment of a .dods response".into())
    })?;
    Ok((&raw[..pos], &raw[pos + DODS_SEPARATOR.len()..]))
}
