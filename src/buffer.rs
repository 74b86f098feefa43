//! Fixed-capacity byte chunk with independent read and write cursors.
//!
//! A `ChunkBuffer` is the unit of memory the transport allocates, fills,
//! drains and recycles. Writing is append-only: bytes consumed from the
//! front are not reclaimed until the chunk goes back to its
//! [`BufferPool`](crate::BufferPool), which resets both cursors.

/// Default chunk capacity in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// A fixed-capacity buffer for network I/O.
///
/// The backing allocation never moves or grows, so the writable region can be
/// handed to the reactor for the duration of a read operation.
///
/// Cursor invariant: `0 <= read_pos <= write_pos <= capacity`.
///
/// # Example
///
/// ```
/// use chunkio::ChunkBuffer;
///
/// let mut buf = ChunkBuffer::new(16);
/// buf.writable_mut()[..5].copy_from_slice(b"hello");
/// buf.commit(5);
/// assert_eq!(buf.readable(), b"hello");
///
/// buf.consume(2);
/// assert_eq!(buf.readable(), b"llo");
/// assert_eq!(buf.space(), 11);
/// ```
#[derive(Debug)]
pub struct ChunkBuffer {
    data: Box<[u8]>,
    /// Bytes before this position have been consumed.
    read_pos: usize,
    /// Bytes have been written up to this position.
    write_pos: usize,
}

impl ChunkBuffer {
    /// Create an empty buffer with the given fixed capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "chunk capacity must be positive");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total capacity of the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Returns true if there are no unread bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Room left to write. Consumed bytes at the front do not count.
    #[inline]
    pub fn space(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Current read cursor.
    #[inline]
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Current write cursor.
    #[inline]
    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// The unread region.
    #[inline]
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// The writable region past the write cursor.
    #[inline]
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..]
    }

    /// Advance the write cursor after `n` bytes were placed in
    /// [`writable_mut`](Self::writable_mut).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the remaining space.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        assert!(
            n <= self.space(),
            "commit({}) exceeds remaining space ({})",
            n,
            self.space()
        );
        self.write_pos += n;
    }

    /// Advance the read cursor past `n` unread bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the unread bytes.
    #[inline]
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.len(),
            "consume({}) exceeds unread bytes ({})",
            n,
            self.len()
        );
        self.read_pos += n;
    }

    /// Append as much of `src` as fits and return the number of bytes copied.
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.space());
        self.writable_mut()[..n].copy_from_slice(&src[..n]);
        self.write_pos += n;
        n
    }

    /// Copy up to `dst.len()` unread bytes into `dst` without consuming them.
    pub fn peek_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.readable()[..n]);
        n
    }

    /// Rewind both cursors. Only the pool does this.
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariant(buf: &ChunkBuffer) {
        assert!(buf.read_pos() <= buf.write_pos());
        assert!(buf.write_pos() <= buf.capacity());
        assert_eq!(buf.len(), buf.write_pos() - buf.read_pos());
        assert_eq!(buf.space(), buf.capacity() - buf.write_pos());
    }

    #[test]
    fn test_new_buffer() {
        let buf = ChunkBuffer::new(DEFAULT_CHUNK_SIZE);
        assert_eq!(buf.capacity(), 4096);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.space(), 4096);
        assert!(buf.is_empty());
        check_invariant(&buf);
    }

    #[test]
    fn test_commit_and_consume() {
        let mut buf = ChunkBuffer::new(64);
        buf.writable_mut()[..11].copy_from_slice(b"hello world");
        buf.commit(11);
        assert_eq!(buf.readable(), b"hello world");
        check_invariant(&buf);

        buf.consume(6);
        assert_eq!(buf.readable(), b"world");
        assert_eq!(buf.len(), 5);
        check_invariant(&buf);
    }

    #[test]
    fn test_space_is_not_reclaimed_by_consume() {
        let mut buf = ChunkBuffer::new(8);
        assert_eq!(buf.put_slice(b"abcdefgh"), 8);
        buf.consume(8);
        assert!(buf.is_empty());
        assert_eq!(buf.space(), 0);
        check_invariant(&buf);
    }

    #[test]
    fn test_put_slice_truncates_at_capacity() {
        let mut buf = ChunkBuffer::new(4);
        assert_eq!(buf.put_slice(b"abcdef"), 4);
        assert_eq!(buf.readable(), b"abcd");
        assert_eq!(buf.put_slice(b"x"), 0);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = ChunkBuffer::new(16);
        buf.put_slice(b"peek");
        let mut dst = [0u8; 8];
        assert_eq!(buf.peek_into(&mut dst), 4);
        assert_eq!(&dst[..4], b"peek");
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_invariant_over_operation_sequence() {
        let mut buf = ChunkBuffer::new(100);
        let mut consumed = 0;
        let steps: &[(usize, usize)] = &[(10, 3), (25, 20), (0, 12), (40, 5), (25, 60)];
        for &(write, read) in steps {
            buf.commit(write);
            check_invariant(&buf);
            buf.consume(read);
            consumed += read;
            check_invariant(&buf);
            assert!(buf.len() + consumed <= buf.capacity());
        }
        assert_eq!(buf.space(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut buf = ChunkBuffer::new(16);
        buf.put_slice(b"data");
        buf.consume(2);
        buf.reset();
        assert_eq!(buf.read_pos(), 0);
        assert_eq!(buf.write_pos(), 0);
        assert_eq!(buf.space(), 16);
    }

    #[test]
    #[should_panic(expected = "exceeds remaining space")]
    fn test_commit_past_capacity_panics() {
        let mut buf = ChunkBuffer::new(8);
        buf.commit(9);
    }

    #[test]
    #[should_panic(expected = "exceeds unread bytes")]
    fn test_consume_past_write_cursor_panics() {
        let mut buf = ChunkBuffer::new(8);
        buf.commit(3);
        buf.consume(4);
    }

    #[test]
    #[should_panic(expected = "chunk capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _ = ChunkBuffer::new(0);
    }
}
