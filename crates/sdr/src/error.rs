// Copyright 2025-2026 CEMAXECUTER LLC

use thiserror::Error;

use crate::StreamFormat;

/// Coarse classification of failures, used by callers to decide whether to
/// retry, reconfigure or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments or wrong lifecycle state; nothing touched the hardware
    Validation,
    /// Control plane or transport failure reported by the hardware
    Hardware,
    /// First buffer did not arrive while activating a stream
    ActivationTimeout,
    /// Device could not be opened
    DeviceOpen,
    /// Sample source I/O failure
    Io,
}

/// Result codes returned by the hardware when applying channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyError {
    TuneFail,
    GainFail,
    Timeout,
    TransportFail,
    Other(i32),
}

#[derive(Error, Debug)]
pub enum RxError {
    #[error("nonexistent channel {0}")]
    InvalidChannel(usize),

    #[error("invalid stream format: {0}")]
    UnsupportedFormat(String),

    #[error("changing stream format is unsupported ({negotiated} negotiated, {requested} requested)")]
    FormatChange {
        negotiated: StreamFormat,
        requested: StreamFormat,
    },

    #[error("multiple streams unsupported")]
    StreamBusy,

    #[error("transmit streaming is not implemented")]
    UnsupportedDirection,

    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(f64),

    #[error("unknown antenna: {0}")]
    UnknownAntenna(String),

    #[error("cannot {op} while stream is {phase}")]
    StreamState { op: &'static str, phase: &'static str },

    #[error("need {needed} output buffers of at least {bytes} bytes, got {got}")]
    OutputBuffers { needed: usize, bytes: usize, got: usize },

    #[error("failure tuning channel {channel} to {freq} Hz")]
    TuneFailure { channel: usize, freq: u64 },

    #[error("failure setting channel {channel} gain to {gain} dB")]
    GainFailure { channel: usize, gain: i8 },

    #[error("timeout configuring RFNM")]
    ConfigTimeout,

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("error {0} configuring RFNM")]
    Config(i32),

    #[error("timeout activating stream on channel {0}")]
    ActivationTimeout(usize),

    #[error("couldn't open the RFNM device: {0}")]
    DeviceOpen(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RxError::InvalidChannel(_)
            | RxError::UnsupportedFormat(_)
            | RxError::FormatChange { .. }
            | RxError::StreamBusy
            | RxError::UnsupportedDirection
            | RxError::UnsupportedSampleRate(_)
            | RxError::UnknownAntenna(_)
            | RxError::StreamState { .. }
            | RxError::OutputBuffers { .. } => ErrorKind::Validation,
            RxError::TuneFailure { .. }
            | RxError::GainFailure { .. }
            | RxError::ConfigTimeout
            | RxError::TransportFailure(_)
            | RxError::Config(_) => ErrorKind::Hardware,
            RxError::ActivationTimeout(_) => ErrorKind::ActivationTimeout,
            RxError::DeviceOpen(_) => ErrorKind::DeviceOpen,
            RxError::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, RxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(RxError::InvalidChannel(7).kind(), ErrorKind::Validation);
        assert_eq!(RxError::StreamBusy.kind(), ErrorKind::Validation);
        assert_eq!(
            RxError::TuneFailure { channel: 0, freq: 1 }.kind(),
            ErrorKind::Hardware
        );
        assert_eq!(RxError::ActivationTimeout(1).kind(), ErrorKind::ActivationTimeout);
        assert_eq!(RxError::DeviceOpen("x".into()).kind(), ErrorKind::DeviceOpen);
    }

    #[test]
    fn test_messages() {
        let e = RxError::FormatChange {
            negotiated: StreamFormat::Cs16,
            requested: StreamFormat::Cf32,
        };
        assert_eq!(
            e.to_string(),
            "changing stream format is unsupported (CS16 negotiated, CF32 requested)"
        );
        assert_eq!(RxError::InvalidChannel(5).to_string(), "nonexistent channel 5");
    }
}
