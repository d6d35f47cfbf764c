use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use rfnm_sdr::file::{FileSource, SampleFormat};
use rfnm_sdr::sim::{SampleSource, SimConfig, SimTransport, ToneSource};
use rfnm_sdr::{Device, DeviceArgs, Direction, StreamFormat};

use num_complex::Complex32;

/// Consecutive empty reads before the capture gives up on the source
const MAX_IDLE_READS: u32 = 10;

pub struct CaptureOptions {
    pub serial: Option<String>,
    pub format: StreamFormat,
    pub channels: Vec<usize>,
    pub freq_mhz: f64,
    pub gain_db: f64,
    pub antenna: Option<String>,
    pub rate_div: u32,
    pub bandwidth_mhz: f64,
    pub dc_correction: bool,
    pub chunk: usize,
    pub timeout_us: i64,
    pub samples: u64,
    pub input: Vec<PathBuf>,
    pub input_format: SampleFormat,
    pub write: Option<String>,
    pub stats: bool,
}

fn open_source(opts: &CaptureOptions, rx_channels: usize) -> Result<Box<dyn SampleSource>, String> {
    if opts.input.is_empty() {
        return Ok(Box::new(ToneSource::new(
            rx_channels,
            0.01,
            0.25,
            Complex32::new(0.02, -0.01),
        )));
    }
    let source = FileSource::open(&opts.input, opts.input_format).map_err(|e| e.to_string())?;
    Ok(Box::new(source))
}

/// Open the device, stream `opts.samples` elements per channel and close.
pub fn run(opts: &CaptureOptions) -> Result<(), String> {
    let config = SimConfig::default();
    let source = open_source(opts, config.hwinfo().rx_channels.len())?;
    let args = DeviceArgs {
        serial: opts.serial.clone(),
    };
    let transport = SimTransport::open(&args, config, source).map_err(|e| e.to_string())?;
    let dev = Device::open(transport).map_err(|e| format!("open device: {}", e))?;

    let clk = dev
        .list_sample_rates(Direction::Rx)
        .first()
        .copied()
        .ok_or("device reports no sample rates")?;
    for &ch in &opts.channels {
        dev.set_frequency(Direction::Rx, ch, opts.freq_mhz * 1e6)
            .map_err(|e| e.to_string())?;
        dev.set_gain(Direction::Rx, ch, opts.gain_db)
            .map_err(|e| e.to_string())?;
        dev.set_sample_rate(Direction::Rx, ch, clk / opts.rate_div as f64)
            .map_err(|e| e.to_string())?;
        dev.set_bandwidth(Direction::Rx, ch, opts.bandwidth_mhz * 1e6)
            .map_err(|e| e.to_string())?;
        if let Some(ref antenna) = opts.antenna {
            dev.set_antenna(Direction::Rx, ch, antenna)
                .map_err(|e| e.to_string())?;
        }
        dev.set_dc_offset_mode(Direction::Rx, ch, opts.dc_correction)
            .map_err(|e| e.to_string())?;
    }

    let mut rx = dev
        .setup_stream(Direction::Rx, opts.format, &opts.channels)
        .map_err(|e| format!("setup stream: {}", e))?;
    rx.activate().map_err(|e| format!("activate stream: {}", e))?;

    let slots = rx.channels();
    let width = opts.format.bytes_per_element();

    let mut writers: Vec<Option<BufWriter<File>>> = Vec::with_capacity(slots.len());
    for &ch in &slots {
        let writer = match opts.write {
            Some(ref prefix) => {
                let path = format!(
                    "{}.ch{}.{}",
                    prefix,
                    ch,
                    opts.format.as_str().to_ascii_lowercase()
                );
                let file = File::create(&path)
                    .map_err(|e| format!("failed to create {}: {}", path, e))?;
                log::info!("writing channel {} to {}", ch, path);
                Some(BufWriter::new(file))
            }
            None => None,
        };
        writers.push(writer);
    }

    let mut bufs: Vec<Vec<u8>> = vec![vec![0u8; opts.chunk * width]; slots.len()];
    let mut totals = vec![0u64; slots.len()];
    let mut timeouts: u64 = 0;
    let mut idle_reads = 0;
    let stats_start = Instant::now();
    let mut last_stats = Instant::now();

    while totals.iter().copied().min().unwrap_or(opts.samples) < opts.samples {
        let done = totals.iter().copied().min().unwrap_or(0);
        let n = (opts.samples - done).min(opts.chunk as u64) as usize;

        let mut outs: Vec<&mut [u8]> = bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
        let res = rx
            .read(&mut outs, n, opts.timeout_us)
            .map_err(|e| format!("read: {}", e))?;

        if res.timed_out {
            timeouts += 1;
        }
        if res.per_channel.iter().all(|&got| got == 0) {
            idle_reads += 1;
            if idle_reads >= MAX_IDLE_READS {
                log::warn!("no samples for {} reads, stopping", idle_reads);
                break;
            }
            continue;
        }
        idle_reads = 0;

        for (slot, &got) in res.per_channel.iter().enumerate() {
            totals[slot] += got as u64;
            if let Some(ref mut w) = writers[slot] {
                w.write_all(&bufs[slot][..got * width])
                    .map_err(|e| format!("write error: {}", e))?;
            }
        }

        if opts.stats && last_stats.elapsed().as_secs() >= 5 {
            let elapsed = stats_start.elapsed().as_secs_f64();
            eprintln!(
                "[{:.1}s] samples: {:?} timeouts: {} overruns: {}",
                elapsed,
                totals,
                timeouts,
                dev.transport().overrun_count(),
            );
            last_stats = Instant::now();
        }
    }

    for w in writers.iter_mut().flatten() {
        w.flush().map_err(|e| format!("write error: {}", e))?;
    }

    if opts.stats {
        let elapsed = stats_start.elapsed().as_secs_f64();
        let rate = totals.iter().sum::<u64>() as f64 / elapsed.max(1e-9);
        eprintln!(
            "done ({:.1}s): samples: {:?} ({:.2} Msps) timeouts: {} overruns: {}",
            elapsed,
            totals,
            rate / 1e6,
            timeouts,
            dev.transport().overrun_count(),
        );
        for &ch in &slots {
            if let Some(offsets) = rx.dc_offsets(ch) {
                eprintln!("ch{} dc: {:?}", ch, offsets);
            }
        }
    }

    rx.close().map_err(|e| format!("close stream: {}", e))?;
    Ok(())
}
