//! Fixed-size byte ring for network message reassembly.
//!
//! Optimised for the pattern: read from socket → parse → consume. The
//! transport writes into `writable_region`, the decoder peeks at complete
//! frames and consumes them. Single-threaded per instance; one byte is
//! reserved so a full buffer never masquerades as empty.

pub const RECV_BUFFER_SIZE: usize = 1024 * 1024;

pub struct RecvBuffer {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    size: usize,
}

impl RecvBuffer {
    pub fn new() -> Self {
        RecvBuffer {
            buf: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            size: 0,
        }
    }

    /// Largest contiguous span that may be written. Empty when the buffer
    /// is full (the applier is not keeping up — callers treat that as a
    /// hard error, not backpressure).
    pub fn writable_region(&mut self) -> &mut [u8] {
        let span = if self.write_pos >= self.read_pos {
            let mut space = RECV_BUFFER_SIZE - self.write_pos;
            // Cannot write the very last byte while read_pos is 0: the
            // wrapped write_pos would equal read_pos and read as empty.
            if self.read_pos == 0 && space > 0 {
                space -= 1;
            }
            space
        } else {
            self.read_pos - self.write_pos - 1
        };
        &mut self.buf[self.write_pos..self.write_pos + span]
    }

    /// Commit `n` bytes written into the region returned by the preceding
    /// `writable_region` call.
    pub fn commit_write(&mut self, n: usize) {
        debug_assert!(self.size + n < RECV_BUFFER_SIZE);
        self.write_pos = (self.write_pos + n) % RECV_BUFFER_SIZE;
        self.size += n;
    }

    /// Bytes currently readable.
    pub fn available(&self) -> usize {
        self.size
    }

    /// Zero-copy view of the first `n` readable bytes. Returns `None` when
    /// fewer than `n` bytes are available or the region wraps; callers fall
    /// back to `peek_bytes` for the wrapped case.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if n > self.size {
            return None;
        }
        let contiguous = RECV_BUFFER_SIZE - self.read_pos;
        if n <= contiguous {
            Some(&self.buf[self.read_pos..self.read_pos + n])
        } else {
            None
        }
    }

    /// Non-consuming read of `dst.len()` bytes, copying across the wrap
    /// point when needed. Returns false if not enough data is available.
    pub fn peek_bytes(&self, dst: &mut [u8]) -> bool {
        let n = dst.len();
        if n > self.size {
            return false;
        }

        let contiguous = RECV_BUFFER_SIZE - self.read_pos;
        if n <= contiguous {
            dst.copy_from_slice(&self.buf[self.read_pos..self.read_pos + n]);
        } else {
            dst[..contiguous].copy_from_slice(&self.buf[self.read_pos..]);
            dst[contiguous..].copy_from_slice(&self.buf[..n - contiguous]);
        }
        true
    }

    /// Consuming read. Returns false if fewer than `dst.len()` bytes are
    /// available; the buffer is untouched in that case.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> bool {
        if !self.peek_bytes(dst) {
            return false;
        }
        self.consume(dst.len());
        true
    }

    /// Discard the first `n` readable bytes, clamped to the available count.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.size);
        self.read_pos = (self.read_pos + n) % RECV_BUFFER_SIZE;
        self.size -= n;
    }

    pub fn capacity(&self) -> usize {
        RECV_BUFFER_SIZE
    }

    pub fn free_space(&self) -> usize {
        RECV_BUFFER_SIZE - self.size - 1
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.size = 0;
    }
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}
