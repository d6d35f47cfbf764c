// Copyright 2025-2026 CEMAXECUTER LLC

use crate::{ApplyError, ApplyMask, ChannelConfig, HwInfo, Result, StreamFormat};

/// A fixed-capacity block of raw sample bytes filled by the acquisition path.
///
/// Exactly one party owns a buffer at any time: the free list, the
/// acquisition path while filling, or the stream while draining. Ownership
/// moves with the value.
#[derive(Debug)]
pub struct HardwareBuffer {
    data: Vec<u8>,
    /// Receive channel that produced the data
    pub channel: usize,
    /// Per-channel transfer counter stamped by the hardware (wraps)
    pub sequence: u32,
}

impl HardwareBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            channel: 0,
            sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// The acquisition and control-plane collaborator underneath a [`crate::Device`].
///
/// Implementations own the buffer queues and whatever moves samples from
/// the radio into them.
pub trait Transport: Send + Sync {
    /// Hardware description, fixed for the lifetime of the transport
    fn hwinfo(&self) -> &HwInfo;

    /// Push the configuration of every channel in `mask` to the hardware.
    /// `channels` holds the full per-channel table, indexed by channel.
    fn apply(&self, channels: &[ChannelConfig], mask: ApplyMask) -> std::result::Result<(), ApplyError>;

    /// Start acquisition in `format`, returning the negotiated size in bytes
    /// of every hardware buffer.
    fn start_transfer(&self, format: StreamFormat) -> Result<usize>;

    /// Halt acquisition. Buffers still being filled are returned to the free list.
    fn stop_transfer(&self);

    /// Hand a drained (or freshly allocated) buffer to the hardware for refilling.
    fn release(&self, buf: HardwareBuffer);

    /// Wait up to `timeout_ms` for the next filled buffer of `channel`.
    /// A zero timeout polls without blocking. `None` means nothing arrived.
    fn dequeue_filled(&self, channel: usize, timeout_ms: u32) -> Option<HardwareBuffer>;

    /// Discard filled buffers still queued, returning them to the free list.
    fn flush(&self, timeout_ms: u32);
}
