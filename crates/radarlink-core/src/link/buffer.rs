//! Receive buffer shared by the link implementations.
//!
//! Partial reads are retained across calls within one connection, so a frame
//! split over several reads (or trailing bytes after a delimiter) is never
//! lost.

/// Growable receive buffer with exact-n and until-delimiter extraction.
#[derive(Debug, Default)]
pub(crate) struct RecvBuffer {
    buf: Vec<u8>,
}

impl RecvBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }

    pub(crate) fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Remove and return the first `n` bytes, if that many are buffered.
    pub(crate) fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.buf.len() < n {
            return None;
        }
        let rest = self.buf.split_off(n);
        Some(std::mem::replace(&mut self.buf, rest))
    }

    /// Remove and return everything up to and including the first occurrence
    /// of `delimiter`, if present.
    pub(crate) fn take_until(&mut self, delimiter: &[u8]) -> Option<Vec<u8>> {
        if delimiter.is_empty() {
            return Some(Vec::new());
        }
        let end = self
            .buf
            .windows(delimiter.len())
            .position(|w| w == delimiter)?
            + delimiter.len();
        self.take(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_exact() {
        let mut buf = RecvBuffer::new();
        buf.extend(b"abcdef");
        assert_eq!(buf.take(10), None);
        assert_eq!(buf.take(4).unwrap(), b"abcd");
        assert_eq!(buf.take(2).unwrap(), b"ef");
        assert_eq!(buf.take(1), None);
    }

    #[test]
    fn take_until_keeps_tail() {
        let mut buf = RecvBuffer::new();
        buf.extend(b"header\nbinary");
        assert_eq!(buf.take_until(b"\n").unwrap(), b"header\n");
        assert_eq!(buf.take(6).unwrap(), b"binary");
    }

    #[test]
    fn take_until_split_delimiter() {
        let mut buf = RecvBuffer::new();
        buf.extend(b"ab\r");
        assert_eq!(buf.take_until(b"\r\n"), None);
        buf.extend(b"\ncd");
        assert_eq!(buf.take_until(b"\r\n").unwrap(), b"ab\r\n");
    }
}
