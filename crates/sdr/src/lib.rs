// Copyright 2025-2026 CEMAXECUTER LLC

pub mod carryover;
pub mod channel;
pub mod device;
pub mod error;
pub mod file;
pub mod format;
pub mod pool;
pub mod sim;
pub mod stream;
pub mod transport;

pub use channel::{ApplyMask, ChannelConfig, Daughterboard, HwInfo, RfPath};
pub use device::{Device, DeviceArgs, DeviceInfo};
pub use error::{ApplyError, ErrorKind, Result, RxError};
pub use format::StreamFormat;
pub use stream::{ReadResult, RxStream, StreamPhase};
pub use transport::{HardwareBuffer, Transport};

/// Upper bound on receive channels across both daughterboards
pub const MAX_RX_CHAN_COUNT: usize = 4;

/// Number of hardware buffers handed to the acquisition path
pub const BUFFER_COUNT: usize = 32;

/// Complex elements carried by one USB receive transfer
pub const RX_PACKET_ELEM_CNT: usize = 1024;

/// Stream direction, as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    /// Transmit streaming is not implemented; the direction exists so
    /// callers get a clean error instead of a silent no-op.
    Tx,
}
