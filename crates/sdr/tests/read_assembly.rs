// Copyright 2025-2026 CEMAXECUTER LLC

//! Read assembly against a transport whose output is fully predictable.

mod common;

use std::time::{Duration, Instant};

use common::{cs16_at, init_logging, pattern_stream, ScriptedTransport};
use rfnm_sdr::{Device, Direction, StreamFormat};

const ELEMS: usize = 1024;

fn open(transport: ScriptedTransport) -> Device<ScriptedTransport> {
    init_logging();
    Device::open(transport).unwrap()
}

#[test]
fn test_two_channel_1500_element_read() {
    let dev = open(ScriptedTransport::with_pattern(ELEMS));
    let mut rx = dev
        .setup_stream(Direction::Rx, StreamFormat::Cs16, &[0, 1])
        .unwrap();
    assert_eq!(rx.outbufsize(), 4096);
    rx.activate().unwrap();

    let mut a = vec![0u8; 1500 * 4];
    let mut b = vec![0u8; 1500 * 4];
    let res = rx
        .read(&mut [a.as_mut_slice(), b.as_mut_slice()], 1500, 1_000_000)
        .unwrap();

    assert_eq!(res.elements, 1500);
    assert_eq!(res.per_channel, vec![1500, 1500]);
    assert!(!res.timed_out);
    for ch in 0..2 {
        assert_eq!(rx.carryover_left(ch), Some((1024 - 476) * 4));
        assert_eq!(dev.transport().produced_bytes(ch), 2 * 4096);
    }
    assert_eq!(a, pattern_stream(0, 4096, 1500 * 4));
    assert_eq!(b, pattern_stream(1, 4096, 1500 * 4));
}

#[test]
fn test_quota_exactness() {
    let k = 3;
    let n = ELEMS - k;
    let dev = open(ScriptedTransport::with_pattern(ELEMS));
    let mut rx = dev.setup_stream(Direction::Rx, StreamFormat::Cs16, &[0]).unwrap();
    rx.activate().unwrap();

    let mut out = vec![0u8; n * 4];
    let res = rx.read(&mut [out.as_mut_slice()], n, 100_000).unwrap();
    assert_eq!(res.elements, n);
    assert_eq!(rx.carryover_left(0), Some(k * 4));

    let res = rx.read(&mut [out.as_mut_slice()], n, 100_000).unwrap();
    assert_eq!(res.elements, n);
    assert_eq!(rx.carryover_left(0), Some(2 * k * 4));
    assert_eq!(dev.transport().produced_bytes(0), 2 * 4096);
}

#[test]
fn test_conservation_over_irregular_reads() {
    let dev = open(ScriptedTransport::with_pattern(ELEMS));
    let mut rx = dev.setup_stream(Direction::Rx, StreamFormat::Cs8, &[1]).unwrap();
    rx.activate().unwrap();
    let outbufsize = rx.outbufsize();
    assert_eq!(outbufsize, ELEMS * 2);

    let mut delivered = Vec::new();
    for n in [1, 7, 1500, 333, 4096, 2, 1024, 1023, 1] {
        let mut out = vec![0u8; n * 2];
        let res = rx.read(&mut [out.as_mut_slice()], n, 100_000).unwrap();
        assert_eq!(res.elements, n);
        delivered.extend_from_slice(&out);

        let left = rx.carryover_left(1).unwrap();
        assert!(left < outbufsize, "carryover holds {} bytes", left);
        assert_eq!(
            delivered.len() + left,
            dev.transport().produced_bytes(1),
            "bytes delivered plus held must equal bytes produced"
        );
    }
    assert_eq!(delivered, pattern_stream(1, outbufsize, delivered.len()));
}

#[test]
fn test_bypass_is_byte_exact_for_every_format() {
    for format in StreamFormat::supported() {
        let dev = open(ScriptedTransport::with_pattern(ELEMS));
        let mut rx = dev.setup_stream(Direction::Rx, format, &[0]).unwrap();
        rx.activate().unwrap();

        let width = format.bytes_per_element();
        let mut out = vec![0u8; 3000 * width];
        let res = rx.read(&mut [out.as_mut_slice()], 3000, 100_000).unwrap();
        assert_eq!(res.elements, 3000);
        assert_eq!(
            out,
            pattern_stream(0, ELEMS * width, 3000 * width),
            "{} output must equal the raw hardware bytes",
            format
        );
        rx.close().unwrap();
    }
}

/// Constant bias plus zero-mean-ish noise on CS16
fn biased(_ch: usize, seq: u32, _format: StreamFormat, buf: &mut [u8]) {
    for (n, elem) in buf.chunks_exact_mut(4).enumerate() {
        let noise = ((n as u32 * 7919 + seq * 104_729) % 101) as i16 - 50;
        elem[..2].copy_from_slice(&(1200 + noise).to_ne_bytes());
        elem[2..].copy_from_slice(&(-800 - noise).to_ne_bytes());
    }
}

#[test]
fn test_dc_locks_on_first_buffer() {
    let dev = open(ScriptedTransport::new(ELEMS, Box::new(biased)));
    dev.set_dc_offset_mode(Direction::Rx, 0, true).unwrap();
    let mut rx = dev.setup_stream(Direction::Rx, StreamFormat::Cs16, &[0]).unwrap();
    rx.activate().unwrap();

    let mut out = vec![0u8; ELEMS * 4];
    rx.read(&mut [out.as_mut_slice()], ELEMS, 100_000).unwrap();

    let (mut sum_i, mut sum_q) = (0f64, 0f64);
    for n in 0..ELEMS {
        let (i, q) = cs16_at(&out, n);
        sum_i += i as f64;
        sum_q += q as f64;
    }
    let (mean_i, mean_q) = (sum_i / ELEMS as f64, sum_q / ELEMS as f64);
    assert!(mean_i.abs() < 1.0, "residual I bias {}", mean_i);
    assert!(mean_q.abs() < 1.0, "residual Q bias {}", mean_q);
}

/// I carries `100 * (seq + 1)`, so every buffer moves the lane mean
fn stepped(_ch: usize, seq: u32, _format: StreamFormat, buf: &mut [u8]) {
    let level = 100 * (seq as i16 + 1);
    for elem in buf.chunks_exact_mut(4) {
        elem[..2].copy_from_slice(&level.to_ne_bytes());
        elem[2..].copy_from_slice(&0i16.to_ne_bytes());
    }
}

#[test]
fn test_recalibration_every_16th_buffer() {
    let dev = open(ScriptedTransport::new(ELEMS, Box::new(stepped)));
    dev.set_dc_offset_mode(Direction::Rx, 0, true).unwrap();
    let mut rx = dev.setup_stream(Direction::Rx, StreamFormat::Cs16, &[0]).unwrap();
    rx.activate().unwrap();
    assert_eq!(rx.dc_offsets(0).unwrap()[0], 100.0, "locked onto buffer 0");

    let mut out = vec![0u8; ELEMS * 4];
    // drains the primed buffer 0
    rx.read(&mut [out.as_mut_slice()], ELEMS, 100_000).unwrap();

    let mut last = rx.dc_offsets(0).unwrap();
    for seq in 1..=32u32 {
        rx.read(&mut [out.as_mut_slice()], ELEMS, 100_000).unwrap();
        let now = rx.dc_offsets(0).unwrap();
        if seq % 16 == 0 {
            assert_ne!(now, last, "offsets must update on buffer {}", seq);
        } else {
            assert_eq!(now, last, "offsets must hold on buffer {}", seq);
        }
        last = now;
        if seq == 16 {
            // 0.1 * 1700 + 0.9 * 100
            assert!((now[0] - 260.0).abs() <= 1.0, "tracked offset {}", now[0]);
        }
    }
}

#[test]
fn test_dc_toggle_applies_to_next_buffer() {
    let dev = open(ScriptedTransport::new(ELEMS, Box::new(stepped)));
    dev.set_dc_offset_mode(Direction::Rx, 0, true).unwrap();
    let mut rx = dev.setup_stream(Direction::Rx, StreamFormat::Cs16, &[0]).unwrap();
    rx.activate().unwrap();

    let mut out = vec![0u8; ELEMS * 4];
    rx.read(&mut [out.as_mut_slice()], ELEMS, 100_000).unwrap();
    assert_eq!(cs16_at(&out, 0), (0, 0), "buffer 0 corrected");

    dev.set_dc_offset_mode(Direction::Rx, 0, false).unwrap();
    rx.read(&mut [out.as_mut_slice()], ELEMS, 100_000).unwrap();
    assert_eq!(cs16_at(&out, 0), (200, 0), "buffer 1 passes through raw");
}

#[test]
fn test_timeout_returns_partial_count() {
    let dev = open(ScriptedTransport::with_pattern(ELEMS));
    let mut rx = dev
        .setup_stream(Direction::Rx, StreamFormat::Cs16, &[0, 1])
        .unwrap();
    // activation plus one more buffer on channel 0, activation only on 1
    dev.transport().set_budget(0, 2);
    dev.transport().set_budget(1, 1);
    rx.activate().unwrap();

    let mut a = vec![0u8; 3000 * 4];
    let mut b = vec![0u8; 3000 * 4];
    let res = rx
        .read(&mut [a.as_mut_slice(), b.as_mut_slice()], 3000, 20_000)
        .unwrap();
    assert!(res.timed_out);
    assert_eq!(res.per_channel, vec![2048, 1024]);
    assert_eq!(res.elements, 1024);

    let res = rx
        .read(&mut [a.as_mut_slice(), b.as_mut_slice()], 3000, 0)
        .unwrap();
    assert_eq!(res.per_channel, vec![0, 0], "nothing left, no error");
}

#[test]
fn test_negative_timeout_takes_only_what_is_ready() {
    let dev = open(ScriptedTransport::with_pattern(ELEMS));
    let mut rx = dev.setup_stream(Direction::Rx, StreamFormat::Cs16, &[0]).unwrap();
    // primed buffer in carryover plus one more ready to dequeue
    dev.transport().set_budget(0, 2);
    rx.activate().unwrap();
    assert_eq!(dev.transport().take_max_wait_ms(), Some(250));

    let mut out = vec![0u8; 3000 * 4];
    let start = Instant::now();
    let res = rx.read(&mut [out.as_mut_slice()], 3000, -1).unwrap();
    assert!(start.elapsed() < Duration::from_millis(50));

    assert!(res.timed_out);
    assert_eq!(res.per_channel, vec![2048]);
    assert_eq!(res.elements, 2048);
    assert_eq!(dev.transport().take_max_wait_ms(), Some(0), "never blocks");
    assert_eq!(out[..2048 * 4], pattern_stream(0, 4096, 2048 * 4)[..]);
    assert_eq!(rx.carryover_left(0), Some(0));
}

#[test]
fn test_buffers_return_to_pool() {
    let dev = open(ScriptedTransport::with_pattern(ELEMS));
    let mut rx = dev
        .setup_stream(Direction::Rx, StreamFormat::Cs16, &[0, 1])
        .unwrap();
    rx.activate().unwrap();
    let mut a = vec![0u8; 5000 * 4];
    let mut b = vec![0u8; 5000 * 4];
    rx.read(&mut [a.as_mut_slice(), b.as_mut_slice()], 5000, 100_000)
        .unwrap();
    assert_eq!(dev.transport().free_count(), rfnm_sdr::BUFFER_COUNT);
    rx.close().unwrap();
}
