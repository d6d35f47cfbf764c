// Copyright 2025-2026 CEMAXECUTER LLC

use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::HardwareBuffer;

/// Queue discipline for hardware buffers: one free list shared by every
/// channel, and one filled queue per channel.
///
/// Buffers circulate free -> filling -> filled -> draining -> free. The
/// queues only ever hold buffers by value, so a buffer can never be seen by
/// two owners at once. The number of buffers in circulation is decided by
/// whoever calls [`BufferPool::release`] with fresh allocations.
pub struct BufferPool {
    free_tx: Sender<HardwareBuffer>,
    free_rx: Receiver<HardwareBuffer>,
    filled: Vec<(Sender<HardwareBuffer>, Receiver<HardwareBuffer>)>,
}

impl BufferPool {
    pub fn new(channels: usize) -> Self {
        let (free_tx, free_rx) = unbounded();
        let filled = (0..channels).map(|_| unbounded()).collect();
        Self {
            free_tx,
            free_rx,
            filled,
        }
    }

    pub fn channels(&self) -> usize {
        self.filled.len()
    }

    /// Take a free buffer for filling, waiting up to `timeout`.
    pub fn acquire_free(&self, timeout: Duration) -> Option<HardwareBuffer> {
        if timeout.is_zero() {
            return self.free_rx.try_recv().ok();
        }
        self.free_rx.recv_timeout(timeout).ok()
    }

    /// Queue a filled buffer for its channel's consumer.
    pub fn submit_filled(&self, buf: HardwareBuffer) {
        match self.filled.get(buf.channel) {
            Some((tx, _)) => {
                // the pool owns both ends, so the send cannot fail
                let _ = tx.send(buf);
            }
            None => {
                log::warn!("filled buffer for unknown channel {}, recycling", buf.channel);
                self.release(buf);
            }
        }
    }

    /// Wait up to `timeout_ms` for the next filled buffer of `channel`.
    /// Zero polls without blocking.
    pub fn dequeue_filled(&self, channel: usize, timeout_ms: u32) -> Option<HardwareBuffer> {
        let (_, rx) = self.filled.get(channel)?;
        if timeout_ms == 0 {
            return rx.try_recv().ok();
        }
        match rx.recv_timeout(Duration::from_millis(timeout_ms as u64)) {
            Ok(buf) => Some(buf),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Return a buffer to the free list.
    pub fn release(&self, mut buf: HardwareBuffer) {
        buf.sequence = 0;
        let _ = self.free_tx.send(buf);
    }

    /// Recycle every filled buffer currently queued. With a non-zero
    /// timeout, keeps draining buffers that land until the timeout expires.
    /// Returns the number of buffers discarded.
    pub fn flush(&self, timeout_ms: u32) -> usize {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut flushed = 0;
        loop {
            for (_, rx) in &self.filled {
                while let Ok(buf) = rx.try_recv() {
                    self.release(buf);
                    flushed += 1;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        flushed
    }

    pub fn free_count(&self) -> usize {
        self.free_rx.len()
    }

    pub fn filled_count(&self, channel: usize) -> usize {
        self.filled.get(channel).map_or(0, |(_, rx)| rx.len())
    }
}
