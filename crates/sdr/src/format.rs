// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;
use std::str::FromStr;

use num_complex::Complex32;
use rfnm_dsp::dc::{DcCorrector, DcOffset};

use crate::RxError;

/// Wire/host sample encoding of a receive stream: interleaved I,Q pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    /// Complex int8
    Cs8,
    /// Complex int16
    Cs16,
    /// Complex float32
    Cf32,
}

impl StreamFormat {
    /// Bytes per complex element (I + Q)
    pub fn bytes_per_element(self) -> usize {
        match self {
            StreamFormat::Cs8 => 2,
            StreamFormat::Cs16 => 4,
            StreamFormat::Cf32 => 8,
        }
    }

    /// Bytes per scalar component
    pub fn bytes_per_component(self) -> usize {
        self.bytes_per_element() / 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamFormat::Cs8 => "CS8",
            StreamFormat::Cs16 => "CS16",
            StreamFormat::Cf32 => "CF32",
        }
    }

    /// Format the hardware produces natively, with its full-scale value
    pub fn native() -> (StreamFormat, f64) {
        (StreamFormat::Cs16, 32768.0)
    }

    /// Formats a receive stream can be set up with, in order of preference
    pub fn supported() -> [StreamFormat; 3] {
        [StreamFormat::Cs16, StreamFormat::Cf32, StreamFormat::Cs8]
    }

    /// Write one normalized sample (full scale 1.0) as native-endian
    /// bytes. `out` must be exactly one element wide.
    pub fn encode(self, sample: Complex32, out: &mut [u8]) {
        match self {
            StreamFormat::Cs8 => {
                out[0] = quantize(sample.re, 128.0) as i8 as u8;
                out[1] = quantize(sample.im, 128.0) as i8 as u8;
            }
            StreamFormat::Cs16 => {
                out[..2].copy_from_slice(&(quantize(sample.re, 32768.0) as i16).to_ne_bytes());
                out[2..4].copy_from_slice(&(quantize(sample.im, 32768.0) as i16).to_ne_bytes());
            }
            StreamFormat::Cf32 => {
                out[..4].copy_from_slice(&sample.re.to_ne_bytes());
                out[4..8].copy_from_slice(&sample.im.to_ne_bytes());
            }
        }
    }

    /// Build a fresh DC engine at this format's native precision
    pub fn dc_corrector(self) -> Box<dyn DcCorrector> {
        match self {
            StreamFormat::Cs8 => Box::new(DcOffset::<i8>::new()),
            StreamFormat::Cs16 => Box::new(DcOffset::<i16>::new()),
            StreamFormat::Cf32 => Box::new(DcOffset::<f32>::new()),
        }
    }
}

fn quantize(v: f32, full_scale: f32) -> f32 {
    (v * full_scale).round().clamp(-full_scale, full_scale - 1.0)
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamFormat {
    type Err = RxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CS8" => Ok(StreamFormat::Cs8),
            "CS16" => Ok(StreamFormat::Cs16),
            "CF32" => Ok(StreamFormat::Cf32),
            other => Err(RxError::UnsupportedFormat(other.to_string())),
        }
    }
}
