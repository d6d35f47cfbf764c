// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt};
use num_complex::Complex32;

use crate::sim::SampleSource;
use crate::{RxError, StreamFormat};

/// IQ sample format for file input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Complex int8 (CS8): pairs of i8
    Ci8,
    /// Complex int16 (CS16): pairs of i16, little-endian
    Ci16,
    /// Complex float32 (CF32): pairs of f32, little-endian
    Cf32,
}

impl SampleFormat {
    fn full_scale(self) -> f32 {
        match self {
            SampleFormat::Ci8 => 128.0,
            SampleFormat::Ci16 => 32768.0,
            SampleFormat::Cf32 => 1.0,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = RxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ci8" | "cs8" => Ok(SampleFormat::Ci8),
            "ci16" | "cs16" => Ok(SampleFormat::Ci16),
            "cf32" => Ok(SampleFormat::Cf32),
            _ => Err(RxError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Replays IQ recordings into the simulated front end, one file per
/// receive channel. A trailing partial buffer at end of file is not
/// delivered.
pub struct FileSource {
    format: SampleFormat,
    readers: Vec<(PathBuf, BufReader<File>)>,
    scratch: Vec<Complex32>,
}

impl FileSource {
    /// Open `paths[n]` as the recording for channel `n`.
    pub fn open<P: AsRef<Path>>(paths: &[P], format: SampleFormat) -> crate::Result<Self> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path).map_err(|e| {
                RxError::DeviceOpen(format!("failed to open {}: {}", path.display(), e))
            })?;
            log::info!("reading IQ from {} ({:?})", path.display(), format);
            readers.push((path.to_path_buf(), BufReader::with_capacity(1024 * 1024, file)));
        }
        Ok(Self {
            format,
            readers,
            scratch: Vec::new(),
        })
    }

    fn read_samples(reader: &mut BufReader<File>, format: SampleFormat, out: &mut [Complex32]) -> io::Result<()> {
        let n = out.len() * 2;
        let scale = format.full_scale();
        match format {
            SampleFormat::Ci8 => {
                let mut raw = vec![0i8; n];
                reader.read_i8_into(&mut raw)?;
                for (s, iq) in out.iter_mut().zip(raw.chunks_exact(2)) {
                    *s = Complex32::new(iq[0] as f32 / scale, iq[1] as f32 / scale);
                }
            }
            SampleFormat::Ci16 => {
                let mut raw = vec![0i16; n];
                reader.read_i16_into::<LittleEndian>(&mut raw)?;
                for (s, iq) in out.iter_mut().zip(raw.chunks_exact(2)) {
                    *s = Complex32::new(iq[0] as f32 / scale, iq[1] as f32 / scale);
                }
            }
            SampleFormat::Cf32 => {
                let mut raw = vec![0f32; n];
                reader.read_f32_into::<LittleEndian>(&mut raw)?;
                for (s, iq) in out.iter_mut().zip(raw.chunks_exact(2)) {
                    *s = Complex32::new(iq[0], iq[1]);
                }
            }
        }
        Ok(())
    }
}

impl SampleSource for FileSource {
    fn fill(&mut self, channel: usize, format: StreamFormat, buf: &mut [u8]) -> io::Result<bool> {
        let Some((path, reader)) = self.readers.get_mut(channel) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no input file for channel {}", channel),
            ));
        };

        let width = format.bytes_per_element();
        self.scratch.resize(buf.len() / width, Complex32::new(0.0, 0.0));
        match Self::read_samples(reader, self.format, &mut self.scratch) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::info!("end of file: {}", path.display());
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        for (elem, s) in buf.chunks_exact_mut(width).zip(&self.scratch) {
            format.encode(*s, elem);
        }
        Ok(true)
    }
}
