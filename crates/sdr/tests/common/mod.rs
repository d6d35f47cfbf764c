// Copyright 2025-2026 CEMAXECUTER LLC

#![allow(dead_code)]

use parking_lot::Mutex;
use rfnm_sdr::sim::SimConfig;
use rfnm_sdr::{
    ApplyError, ApplyMask, ChannelConfig, HardwareBuffer, HwInfo, StreamFormat, Transport,
};

/// Fills a hardware buffer of `channel` carrying transfer counter `seq`
pub type Generator = Box<dyn Fn(usize, u32, StreamFormat, &mut [u8]) + Send + Sync>;

struct State {
    format: Option<StreamFormat>,
    running: bool,
    free: Vec<HardwareBuffer>,
    next_seq: Vec<u32>,
    /// Buffers each channel may still produce; `None` is unlimited
    budget: Vec<Option<usize>>,
    produced_bytes: Vec<usize>,
    /// Longest wait asked of `dequeue_filled` since last taken
    max_wait_ms: Option<u32>,
}

/// Single-threaded transport that produces a buffer on demand whenever the
/// stream asks for one, so every sequence counter and byte is predictable.
pub struct ScriptedTransport {
    hwinfo: HwInfo,
    elems: usize,
    gen: Generator,
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub fn new(elems: usize, gen: Generator) -> Self {
        let hwinfo = SimConfig::default().hwinfo();
        let channels = hwinfo.rx_channels.len();
        Self {
            hwinfo,
            elems,
            gen,
            state: Mutex::new(State {
                format: None,
                running: false,
                free: Vec::new(),
                next_seq: vec![0; channels],
                budget: vec![None; channels],
                produced_bytes: vec![0; channels],
                max_wait_ms: None,
            }),
        }
    }

    pub fn with_pattern(elems: usize) -> Self {
        Self::new(elems, Box::new(pattern_fill))
    }

    pub fn set_budget(&self, channel: usize, buffers: usize) {
        self.state.lock().budget[channel] = Some(buffers);
    }

    pub fn produced_bytes(&self, channel: usize) -> usize {
        self.state.lock().produced_bytes[channel]
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Longest dequeue timeout requested since the last call, if any
    pub fn take_max_wait_ms(&self) -> Option<u32> {
        self.state.lock().max_wait_ms.take()
    }
}

impl Transport for ScriptedTransport {
    fn hwinfo(&self) -> &HwInfo {
        &self.hwinfo
    }

    fn apply(&self, _channels: &[ChannelConfig], _mask: ApplyMask) -> Result<(), ApplyError> {
        Ok(())
    }

    fn start_transfer(&self, format: StreamFormat) -> rfnm_sdr::Result<usize> {
        let mut st = self.state.lock();
        st.format = Some(format);
        st.running = true;
        Ok(self.elems * format.bytes_per_element())
    }

    fn stop_transfer(&self) {
        self.state.lock().running = false;
    }

    fn release(&self, buf: HardwareBuffer) {
        self.state.lock().free.push(buf);
    }

    fn dequeue_filled(&self, channel: usize, timeout_ms: u32) -> Option<HardwareBuffer> {
        let mut st = self.state.lock();
        st.max_wait_ms = Some(st.max_wait_ms.map_or(timeout_ms, |w| w.max(timeout_ms)));
        let format = st.format?;
        if !st.running {
            return None;
        }
        if st.budget[channel] == Some(0) {
            return None;
        }
        let mut buf = st.free.pop()?;
        if let Some(n) = st.budget[channel].as_mut() {
            *n -= 1;
        }

        let seq = st.next_seq[channel];
        st.next_seq[channel] = seq.wrapping_add(1);
        (self.gen)(channel, seq, format, buf.data_mut());
        buf.channel = channel;
        buf.sequence = seq;
        st.produced_bytes[channel] += buf.len();
        Some(buf)
    }

    fn flush(&self, _timeout_ms: u32) {}
}

/// Byte `i` of buffer `seq` on `channel`; unique enough to catch reordering,
/// duplication and loss.
pub fn pattern_byte(channel: usize, seq: u32, i: usize) -> u8 {
    let h = (channel as u32).wrapping_mul(0x9E37_79B9)
        ^ seq.wrapping_mul(0x85EB_CA6B)
        ^ (i as u32).wrapping_mul(0xC2B2_AE35);
    (h >> 13) as u8
}

pub fn pattern_fill(channel: usize, seq: u32, _format: StreamFormat, buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = pattern_byte(channel, seq, i);
    }
}

/// The first `len` bytes a channel produces, buffer after buffer
pub fn pattern_stream(channel: usize, outbufsize: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|n| pattern_byte(channel, (n / outbufsize) as u32, n % outbufsize))
        .collect()
}

pub fn cs16_at(buf: &[u8], elem: usize) -> (i16, i16) {
    let b = &buf[elem * 4..elem * 4 + 4];
    (i16::from_ne_bytes([b[0], b[1]]), i16::from_ne_bytes([b[2], b[3]]))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
