// Copyright 2025-2026 CEMAXECUTER LLC

//! Receive stream lifecycle and read assembly.
//!
//! Hardware buffers arrive in fixed sizes; callers ask for arbitrary element
//! counts. Each enabled channel keeps a [`Carryover`] holding the tail of the
//! last buffer that did not fit, so every byte the hardware delivered is
//! handed to exactly one read, in arrival order.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use rfnm_dsp::dc::{is_recal_point, DcCorrector, LANES, LOCK_COEFF, TRACK_COEFF};
use serde::Serialize;

use crate::carryover::Carryover;
use crate::{
    ApplyMask, Device, Direction, HardwareBuffer, Result, RxError, StreamFormat, Transport,
    BUFFER_COUNT,
};

/// Wait for the first buffer of each channel on activation
const ACTIVATE_TIMEOUT_MS: u32 = 250;

/// Stale buffers are drained for this long when a stream is set up
const SETUP_FLUSH_MS: u32 = 20;

/// Reads with at least this timeout log when they come back short
const TIMEOUT_LOG_THRESHOLD_US: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    /// Format negotiated, buffers allocated
    Configured,
    /// Primed with one buffer per channel
    Active,
    /// At least one read since activation
    Streaming,
    Closed,
}

impl StreamPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamPhase::Idle => "idle",
            StreamPhase::Configured => "configured",
            StreamPhase::Active => "active",
            StreamPhase::Streaming => "streaming",
            StreamPhase::Closed => "closed",
        }
    }

    fn is_open(self) -> bool {
        matches!(
            self,
            StreamPhase::Configured | StreamPhase::Active | StreamPhase::Streaming
        )
    }
}

/// Outcome of one [`RxStream::read`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResult {
    /// Elements delivered on every channel (minimum across output slots)
    pub elements: usize,
    /// Elements written to each output slot
    pub per_channel: Vec<usize>,
    /// The deadline passed before every channel reached its quota
    pub timed_out: bool,
}

/// Per-channel read state, allocated once the format is negotiated
struct Lane {
    carryover: Carryover,
    dc: Box<dyn DcCorrector>,
}

#[derive(Debug, Clone, Copy)]
struct Negotiated {
    format: StreamFormat,
    outbufsize: usize,
}

/// Stream state owned by the device. Allocations made on the first setup
/// live until the device is dropped.
pub(crate) struct StreamCore {
    phase: StreamPhase,
    negotiated: Option<Negotiated>,
    lanes: Vec<Lane>,
    /// Enabled channels, ascending; output slot `i` is `active[i]`
    active: Vec<usize>,
    /// Transfer running and `active` enabled at the hardware
    acquiring: bool,
}

impl StreamCore {
    pub(crate) fn new() -> Self {
        Self {
            phase: StreamPhase::Idle,
            negotiated: None,
            lanes: Vec::new(),
            active: Vec::new(),
            acquiring: false,
        }
    }

    fn require(&self, op: &'static str, ok: &[StreamPhase]) -> Result<Negotiated> {
        match self.negotiated {
            Some(neg) if ok.contains(&self.phase) => Ok(neg),
            _ => Err(RxError::StreamState {
                op,
                phase: self.phase.as_str(),
            }),
        }
    }
}

impl<T: Transport> Device<T> {
    /// Switch the enable flag of `channels` and push it to the hardware.
    fn set_enabled(&self, channels: &[usize], enable: bool) -> Result<()> {
        let mask: ApplyMask = channels.iter().copied().collect();
        if mask.is_empty() {
            return Ok(());
        }
        let mut cfg = self.channels.lock();
        for &ch in channels {
            cfg[ch].enable = enable;
        }
        let result = self.apply(&cfg, mask);
        if result.is_err() && enable {
            for &ch in channels {
                cfg[ch].enable = false;
            }
        }
        result
    }

    /// Restart acquisition for a stream whose transfer was stopped.
    fn resume_transfer(&self, core: &mut StreamCore, neg: Negotiated) -> Result<()> {
        let outbufsize = self.transport.start_transfer(neg.format)?;
        if outbufsize != neg.outbufsize {
            self.transport.stop_transfer();
            return Err(RxError::TransportFailure(format!(
                "buffer size changed from {} to {} bytes",
                neg.outbufsize, outbufsize
            )));
        }
        self.transport.flush(SETUP_FLUSH_MS);
        if let Err(e) = self.set_enabled(&core.active, true) {
            self.transport.stop_transfer();
            return Err(e);
        }
        core.acquiring = true;
        Ok(())
    }

    /// Stop the transfer, disable the stream's channels and drop every
    /// queued or held byte. Cleanup runs to completion even when the
    /// hardware rejects the disable.
    fn halt(&self, core: &mut StreamCore) -> Result<()> {
        let mut result = Ok(());
        if core.acquiring {
            self.transport.stop_transfer();
            result = self.set_enabled(&core.active, false);
            core.acquiring = false;
        }
        self.transport.flush(0);
        for lane in core.lanes.iter_mut() {
            lane.carryover.clear();
        }
        result
    }

    /// Negotiate `format`, enable `channels` and start acquisition.
    ///
    /// Only one stream may exist at a time. The format is fixed by the first
    /// setup for the life of the device.
    pub fn setup_stream(
        &self,
        dir: Direction,
        format: StreamFormat,
        channels: &[usize],
    ) -> Result<RxStream<'_, T>> {
        if dir == Direction::Tx {
            return Err(RxError::UnsupportedDirection);
        }

        let mut core = self.core.lock();
        if core.phase.is_open() {
            return Err(RxError::StreamBusy);
        }
        for &ch in channels {
            self.check_channel(ch)?;
        }
        if let Some(neg) = core.negotiated {
            if neg.format != format {
                return Err(RxError::FormatChange {
                    negotiated: neg.format,
                    requested: format,
                });
            }
        }

        let outbufsize = self.transport.start_transfer(format)?;
        match core.negotiated {
            None => {
                for _ in 0..BUFFER_COUNT {
                    self.transport.release(HardwareBuffer::new(outbufsize));
                }
                core.lanes = (0..self.num_channels(Direction::Rx))
                    .map(|_| Lane {
                        carryover: Carryover::new(outbufsize),
                        dc: format.dc_corrector(),
                    })
                    .collect();
                core.negotiated = Some(Negotiated { format, outbufsize });
            }
            Some(neg) if neg.outbufsize != outbufsize => {
                self.transport.stop_transfer();
                return Err(RxError::TransportFailure(format!(
                    "buffer size changed from {} to {} bytes",
                    neg.outbufsize, outbufsize
                )));
            }
            Some(_) => {}
        }

        self.transport.flush(SETUP_FLUSH_MS);

        let mut active = channels.to_vec();
        active.sort_unstable();
        active.dedup();

        if let Err(e) = self.set_enabled(&active, true) {
            self.transport.stop_transfer();
            return Err(e);
        }

        for lane in core.lanes.iter_mut() {
            lane.carryover.clear();
        }
        core.active = active;
        core.acquiring = true;
        core.phase = StreamPhase::Configured;

        log::info!(
            "rx stream set up: {} on channels {:?} ({} byte buffers)",
            format,
            core.active,
            outbufsize
        );

        Ok(RxStream {
            device: self,
            closed: false,
        })
    }
}

/// Handle to the device's receive stream. Dropping it closes the stream.
pub struct RxStream<'a, T: Transport> {
    device: &'a Device<T>,
    closed: bool,
}

impl<'a, T: Transport> RxStream<'a, T> {
    pub fn phase(&self) -> StreamPhase {
        self.device.core.lock().phase
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.device.core.lock().negotiated.map(|n| n.format)
    }

    /// Negotiated hardware buffer size in bytes
    pub fn outbufsize(&self) -> usize {
        self.device.core.lock().negotiated.map_or(0, |n| n.outbufsize)
    }

    /// Enabled channels in output-slot order
    pub fn channels(&self) -> Vec<usize> {
        self.device.core.lock().active.clone()
    }

    /// Bytes held back for the next read on `channel`
    pub fn carryover_left(&self, channel: usize) -> Option<usize> {
        let core = self.device.core.lock();
        core.lanes.get(channel).map(|l| l.carryover.left())
    }

    /// Current DC estimate of `channel`, one value per lane
    pub fn dc_offsets(&self, channel: usize) -> Option<[f32; LANES]> {
        let core = self.device.core.lock();
        core.lanes.get(channel).map(|l| l.dc.lane_offsets())
    }

    /// Prime every enabled channel with its first buffer and lock the DC
    /// estimate onto it. After [`RxStream::deactivate`] acquisition is
    /// restarted first, so the primed buffer is never stale.
    pub fn activate(&mut self) -> Result<()> {
        let mut guard = self.device.core.lock();
        let neg = guard.require("activate", &[StreamPhase::Configured])?;

        let core = &mut *guard;
        if !core.acquiring {
            self.device.resume_transfer(core, neg)?;
        }
        for &ch in &core.active {
            let Some(buf) = self.device.transport.dequeue_filled(ch, ACTIVATE_TIMEOUT_MS) else {
                log::error!("no data on channel {} within {} ms", ch, ACTIVATE_TIMEOUT_MS);
                return Err(RxError::ActivationTimeout(ch));
            };

            let lane = &mut core.lanes[ch];
            lane.carryover.prime(buf.data());
            self.device.transport.release(buf);

            lane.dc.measure(lane.carryover.pending_mut(), LOCK_COEFF);
            if self.device.dc_correction[ch].load(Ordering::Relaxed) {
                lane.dc.apply(lane.carryover.pending_mut());
            }
        }

        core.phase = StreamPhase::Active;
        log::info!("rx stream activated");
        Ok(())
    }

    /// Read up to `num_elems` elements per enabled channel into `buffs`
    /// (one slot per channel, in [`RxStream::channels`] order).
    ///
    /// The timeout bounds the whole call. A zero or negative timeout only
    /// takes what is already queued. Running out of time is not an error:
    /// the result reports how much arrived.
    pub fn read(
        &mut self,
        buffs: &mut [&mut [u8]],
        num_elems: usize,
        timeout_us: i64,
    ) -> Result<ReadResult> {
        let deadline = Instant::now() + Duration::from_micros(timeout_us.max(0) as u64);

        let mut guard = self.device.core.lock();
        let neg = guard.require("read", &[StreamPhase::Active, StreamPhase::Streaming])?;
        let width = neg.format.bytes_per_element();
        let want = num_elems * width;

        let core = &mut *guard;
        if buffs.len() < core.active.len()
            || buffs[..core.active.len()].iter().any(|b| b.len() < want)
        {
            return Err(RxError::OutputBuffers {
                needed: core.active.len(),
                bytes: want,
                got: buffs.len(),
            });
        }
        core.phase = StreamPhase::Streaming;

        let transport = &self.device.transport;
        let mut per_channel = Vec::with_capacity(core.active.len());
        let mut timed_out = false;

        for (slot, &ch) in core.active.iter().enumerate() {
            let out = &mut buffs[slot][..want];
            let lane = &mut core.lanes[ch];

            let mut got = lane.carryover.drain_into(out) / width;

            while got < num_elems {
                let wait_ms = if timeout_us <= 0 {
                    0
                } else {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    remaining.as_millis().min(u32::MAX as u128) as u32
                };

                let Some(mut buf) = transport.dequeue_filled(ch, wait_ms) else {
                    timed_out = true;
                    if timeout_us >= TIMEOUT_LOG_THRESHOLD_US {
                        log::info!(
                            "read timeout, got {} of {} within {} us",
                            got,
                            num_elems,
                            timeout_us
                        );
                    }
                    break;
                };

                if self.device.dc_correction[ch].load(Ordering::Relaxed) {
                    if is_recal_point(buf.sequence) {
                        lane.dc.measure(buf.data(), TRACK_COEFF);
                    }
                    lane.dc.apply(buf.data_mut());
                }

                let buf_elems = buf.len() / width;
                let take = (num_elems - got).min(buf_elems);
                out[got * width..(got + take) * width]
                    .copy_from_slice(&buf.data()[..take * width]);
                if take < buf_elems {
                    lane.carryover.stash(&buf.data()[take * width..buf_elems * width]);
                }
                got += take;

                transport.release(buf);
            }

            per_channel.push(got);
        }

        Ok(ReadResult {
            elements: per_channel.iter().copied().min().unwrap_or(0),
            per_channel,
            timed_out,
        })
    }

    /// Stop acquisition, disable the stream's channels and discard queued
    /// buffers and carryover. The stream stays set up;
    /// [`RxStream::activate`] restarts it.
    pub fn deactivate(&mut self) -> Result<()> {
        let mut core = self.device.core.lock();
        core.require(
            "deactivate",
            &[
                StreamPhase::Configured,
                StreamPhase::Active,
                StreamPhase::Streaming,
            ],
        )?;
        if core.phase == StreamPhase::Configured {
            return Ok(());
        }

        let result = self.device.halt(&mut core);
        core.phase = StreamPhase::Configured;
        log::info!("rx stream deactivated");
        result
    }

    /// Stop acquisition, disable the stream's channels and drop queued data.
    /// Buffers stay allocated for the next setup.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let dev = self.device;
        let mut core = dev.core.lock();
        if !core.phase.is_open() {
            return Ok(());
        }

        let result = dev.halt(&mut core);
        core.active.clear();
        core.phase = StreamPhase::Closed;
        log::info!("rx stream closed");
        result
    }
}

impl<T: Transport> Drop for RxStream<'_, T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.shutdown() {
            log::error!("closing rx stream: {}", e);
        }
    }
}
