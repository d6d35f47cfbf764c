// Copyright 2025-2026 CEMAXECUTER LLC

//! Software stand-in for the RFNM USB acquisition path.
//!
//! A worker thread plays the role of the USB receive threads: it takes free
//! buffers from the pool, fills them from a [`SampleSource`] for every
//! enabled channel, stamps a per-channel transfer counter and queues them
//! as filled. The control plane validates requests against the simulated
//! board's ranges, so tuning and gain failures surface exactly as they
//! would from the hardware.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use num_complex::Complex32;
use parking_lot::Mutex;
use rfnm_dsp::tone::Tone;

use crate::device::DeviceArgs;
use crate::pool::BufferPool;
use crate::{
    ApplyError, ApplyMask, ChannelConfig, Daughterboard, HardwareBuffer, HwInfo, Result, RfPath,
    RxError, StreamFormat, Transport, RX_PACKET_ELEM_CNT,
};

/// How long the worker waits for a free buffer before counting an overrun
const FREE_WAIT: Duration = Duration::from_millis(5);

/// Producer of raw samples for the simulated front end.
pub trait SampleSource: Send {
    /// Fill `buf` (a whole number of `format` elements) with the next
    /// samples of `channel`. Returns `Ok(false)` once the source has no
    /// more data; `buf` is then left unspecified and is not delivered.
    fn fill(&mut self, channel: usize, format: StreamFormat, buf: &mut [u8]) -> io::Result<bool>;
}

/// Simulated board description and acquisition cadence.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub serial: String,
    pub daughterboards: [Option<Daughterboard>; 2],
    /// Sample clock in Hz
    pub dcs_clk: f64,
    /// Complex elements per hardware buffer; must be a multiple of 4 so a
    /// buffer always holds whole DC lanes.
    pub elems_per_buffer: usize,
    /// Delay between acquisition rounds (one buffer per enabled channel)
    pub buffer_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            serial: "SIM0000001".to_string(),
            daughterboards: [
                Some(Daughterboard {
                    board_id: 1,
                    name: "Granita".to_string(),
                    rx_ch_cnt: 2,
                    tx_ch_cnt: 1,
                }),
                None,
            ],
            dcs_clk: 122_880_000.0,
            elems_per_buffer: RX_PACKET_ELEM_CNT,
            buffer_interval: Duration::ZERO,
        }
    }
}

impl SimConfig {
    /// Hardware description the simulated board reports
    pub fn hwinfo(&self) -> HwInfo {
        let mut rx_channels = Vec::new();
        for (slot, db) in self.daughterboards.iter().enumerate() {
            let Some(db) = db else { continue };
            let paths = if slot == 0 {
                vec![RfPath::SmaA, RfPath::SmaB, RfPath::SmaC, RfPath::EmbedAnt]
            } else {
                vec![RfPath::SmaE, RfPath::SmaF, RfPath::SmaG, RfPath::Loopback]
            };
            for _ in 0..db.rx_ch_cnt {
                rx_channels.push(ChannelConfig {
                    enable: false,
                    freq: 2_450_000_000,
                    freq_min: 600_000_000,
                    freq_max: 7_200_000_000,
                    path: paths[0],
                    path_preferred: paths[0],
                    path_possible: paths.clone(),
                    samp_freq_div_n: 1,
                    gain: 0,
                    gain_min: -12,
                    gain_max: 60,
                    rfic_lpf_bw: 80,
                });
            }
        }

        HwInfo {
            serial: self.serial.clone(),
            daughterboards: self.daughterboards.clone(),
            dcs_clk: self.dcs_clk,
            rx_channels,
        }
    }
}

/// List the simulated boards that would answer an enumeration.
pub fn discover(config: &SimConfig) -> Vec<HwInfo> {
    vec![config.hwinfo()]
}

/// Shared between the transport and its worker thread
struct Acquisition {
    pool: BufferPool,
    enabled: Vec<AtomicBool>,
    running: AtomicBool,
    overruns: AtomicU64,
    produced: Vec<AtomicU64>,
    source: Mutex<Box<dyn SampleSource>>,
}

pub struct SimTransport {
    hwinfo: HwInfo,
    config: SimConfig,
    acq: Arc<Acquisition>,
    worker: Mutex<Option<JoinHandle<()>>>,
    injected: Mutex<Option<ApplyError>>,
}

impl SimTransport {
    /// Open the simulated board, honoring a serial selector.
    pub fn open(
        args: &DeviceArgs,
        config: SimConfig,
        source: Box<dyn SampleSource>,
    ) -> Result<Self> {
        if let Some(ref serial) = args.serial {
            if *serial != config.serial {
                return Err(RxError::DeviceOpen(format!("no device with serial {}", serial)));
            }
        }
        if config.elems_per_buffer == 0 || config.elems_per_buffer % 4 != 0 {
            return Err(RxError::DeviceOpen(format!(
                "buffer size of {} elements is not a multiple of 4",
                config.elems_per_buffer
            )));
        }

        let hwinfo = config.hwinfo();
        let channels = hwinfo.rx_channels.len();
        log::info!(
            "simulated RFNM opened (serial={}, {} rx channels, {} elements per buffer)",
            hwinfo.serial,
            channels,
            config.elems_per_buffer
        );

        Ok(Self {
            hwinfo,
            config,
            acq: Arc::new(Acquisition {
                pool: BufferPool::new(channels),
                enabled: (0..channels).map(|_| AtomicBool::new(false)).collect(),
                running: AtomicBool::new(false),
                overruns: AtomicU64::new(0),
                produced: (0..channels).map(|_| AtomicU64::new(0)).collect(),
                source: Mutex::new(source),
            }),
            worker: Mutex::new(None),
            injected: Mutex::new(None),
        })
    }

    /// Make the next `apply` fail with `err`.
    pub fn inject_apply_error(&self, err: ApplyError) {
        *self.injected.lock() = Some(err);
    }

    /// Buffers skipped because no free buffer was available
    pub fn overrun_count(&self) -> u64 {
        self.acq.overruns.load(Ordering::Relaxed)
    }

    /// Buffers queued as filled for `channel` since the transport was opened
    pub fn produced_count(&self, channel: usize) -> u64 {
        self.acq
            .produced
            .get(channel)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn is_enabled(&self, channel: usize) -> bool {
        self.acq
            .enabled
            .get(channel)
            .is_some_and(|e| e.load(Ordering::Acquire))
    }

    pub fn pool(&self) -> &BufferPool {
        &self.acq.pool
    }
}

impl Transport for SimTransport {
    fn hwinfo(&self) -> &HwInfo {
        &self.hwinfo
    }

    fn apply(&self, channels: &[ChannelConfig], mask: ApplyMask) -> std::result::Result<(), ApplyError> {
        if let Some(err) = self.injected.lock().take() {
            return Err(err);
        }

        for ch in mask.channels() {
            let (Some(cfg), Some(enabled)) = (channels.get(ch), self.acq.enabled.get(ch)) else {
                return Err(ApplyError::Other(-1));
            };
            if cfg.freq < cfg.freq_min || cfg.freq > cfg.freq_max {
                return Err(ApplyError::TuneFail);
            }
            if cfg.gain < cfg.gain_min || cfg.gain > cfg.gain_max {
                return Err(ApplyError::GainFail);
            }
            if !matches!(cfg.samp_freq_div_n, 1 | 2) || !cfg.path_possible.contains(&cfg.path) {
                return Err(ApplyError::Other(-2));
            }
            enabled.store(cfg.enable, Ordering::Release);
        }
        Ok(())
    }

    fn start_transfer(&self, format: StreamFormat) -> Result<usize> {
        let outbufsize = self.config.elems_per_buffer * format.bytes_per_element();

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            self.acq.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
        }

        self.acq.running.store(true, Ordering::SeqCst);
        let acq = self.acq.clone();
        let interval = self.config.buffer_interval;
        let handle = std::thread::Builder::new()
            .name("rfnm-rx-acq".to_string())
            .spawn(move || acquisition_loop(&acq, format, outbufsize, interval))
            .map_err(|e| RxError::TransportFailure(format!("spawn acquisition thread: {}", e)))?;
        *worker = Some(handle);

        log::info!("rx transfer started ({}, {} byte buffers)", format, outbufsize);
        Ok(outbufsize)
    }

    fn stop_transfer(&self) {
        self.acq.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
            log::info!("rx transfer stopped");
        }
    }

    fn release(&self, buf: HardwareBuffer) {
        self.acq.pool.release(buf);
    }

    fn dequeue_filled(&self, channel: usize, timeout_ms: u32) -> Option<HardwareBuffer> {
        self.acq.pool.dequeue_filled(channel, timeout_ms)
    }

    fn flush(&self, timeout_ms: u32) {
        let n = self.acq.pool.flush(timeout_ms);
        if n > 0 {
            log::debug!("flushed {} stale buffers", n);
        }
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.stop_transfer();
    }
}

fn acquisition_loop(acq: &Acquisition, format: StreamFormat, outbufsize: usize, interval: Duration) {
    let mut sequence = vec![0u32; acq.enabled.len()];
    let mut overrunning = false;
    let mut mismatched = false;
    let mut exhausted = false;

    while acq.running.load(Ordering::SeqCst) {
        let mut active = false;

        for (ch, enabled) in acq.enabled.iter().enumerate() {
            if exhausted || !enabled.load(Ordering::Acquire) {
                continue;
            }
            active = true;

            let seq = sequence[ch];
            sequence[ch] = seq.wrapping_add(1);

            let Some(mut buf) = acq.pool.acquire_free(FREE_WAIT) else {
                acq.overruns.fetch_add(1, Ordering::Relaxed);
                if !overrunning {
                    log::warn!("rx overrun on channel {}: no free buffers", ch);
                    overrunning = true;
                }
                continue;
            };
            overrunning = false;

            if buf.len() != outbufsize {
                // allocated for a previous negotiation; never handed out
                if !mismatched {
                    log::error!("skipping {} byte buffer, expected {}", buf.len(), outbufsize);
                    mismatched = true;
                }
                acq.pool.release(buf);
                continue;
            }

            let filled = acq.source.lock().fill(ch, format, buf.data_mut());
            match filled {
                Ok(true) => {
                    buf.channel = ch;
                    buf.sequence = seq;
                    acq.pool.submit_filled(buf);
                    acq.produced[ch].fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    log::info!("sample source exhausted");
                    acq.pool.release(buf);
                    exhausted = true;
                }
                Err(e) => {
                    log::error!("sample source error: {}", e);
                    acq.pool.release(buf);
                    exhausted = true;
                }
            }
        }

        if !active {
            std::thread::sleep(Duration::from_millis(1));
        } else if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
}

/// Complex tone plus DC bias on every channel. Channel `n` runs at
/// `(n + 1) * freq` so channels are distinguishable.
pub struct ToneSource {
    tones: Vec<Tone>,
}

impl ToneSource {
    pub fn new(channels: usize, freq: f32, amplitude: f32, dc: Complex32) -> Self {
        Self {
            tones: (0..channels)
                .map(|ch| Tone::new(freq * (ch + 1) as f32, amplitude, dc))
                .collect(),
        }
    }
}

impl SampleSource for ToneSource {
    fn fill(&mut self, channel: usize, format: StreamFormat, buf: &mut [u8]) -> io::Result<bool> {
        let Some(tone) = self.tones.get_mut(channel) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no tone for channel {}", channel),
            ));
        };
        for elem in buf.chunks_exact_mut(format.bytes_per_element()) {
            format.encode(tone.next_sample(), elem);
        }
        Ok(true)
    }
}
