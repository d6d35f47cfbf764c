// Copyright 2025-2026 CEMAXECUTER LLC

/// Per-channel holding area for hardware-buffer bytes the caller has not
/// consumed yet.
///
/// Invariant: `offset + left <= capacity`.
#[derive(Debug)]
pub struct Carryover {
    buf: Vec<u8>,
    left: usize,
    offset: usize,
}

impl Carryover {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            left: 0,
            offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes not yet delivered
    pub fn left(&self) -> usize {
        self.left
    }

    /// Read cursor into the buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.left == 0
    }

    /// Hold a whole hardware buffer (stream activation).
    pub fn prime(&mut self, src: &[u8]) {
        self.clear();
        self.stash(src);
    }

    /// Hold the unconsumed tail of a hardware buffer. Any bytes still held
    /// are replaced, so callers stash only once the carryover is drained.
    pub fn stash(&mut self, remainder: &[u8]) {
        debug_assert!(self.left == 0, "stash over {} undelivered bytes", self.left);
        let n = remainder.len().min(self.buf.len());
        if n < remainder.len() {
            log::error!(
                "carryover overflow: {} bytes for a {} byte buffer",
                remainder.len(),
                self.buf.len()
            );
        }
        self.buf[..n].copy_from_slice(&remainder[..n]);
        self.left = n;
        self.offset = 0;
    }

    /// Held bytes, for in-place processing
    pub fn pending_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..self.offset + self.left]
    }

    /// Copy as many held bytes as fit into `out`, returning the count.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.left.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.offset..self.offset + n]);
        self.offset += n;
        self.left -= n;
        n
    }

    pub fn clear(&mut self) {
        self.left = 0;
        self.offset = 0;
    }
}
