// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;
use std::str::FromStr;

use crate::{RxError, MAX_RX_CHAN_COUNT};

/// RF signal path (antenna port) selectable on a receive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RfPath {
    SmaA,
    SmaB,
    SmaC,
    SmaD,
    SmaE,
    SmaF,
    SmaG,
    SmaH,
    EmbedAnt,
    Loopback,
}

impl RfPath {
    pub fn as_str(self) -> &'static str {
        match self {
            RfPath::SmaA => "A",
            RfPath::SmaB => "B",
            RfPath::SmaC => "C",
            RfPath::SmaD => "D",
            RfPath::SmaE => "E",
            RfPath::SmaF => "F",
            RfPath::SmaG => "G",
            RfPath::SmaH => "H",
            RfPath::EmbedAnt => "ANT",
            RfPath::Loopback => "LOOPBACK",
        }
    }
}

impl fmt::Display for RfPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RfPath {
    type Err = RxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = match s.to_ascii_uppercase().as_str() {
            "A" => RfPath::SmaA,
            "B" => RfPath::SmaB,
            "C" => RfPath::SmaC,
            "D" => RfPath::SmaD,
            "E" => RfPath::SmaE,
            "F" => RfPath::SmaF,
            "G" => RfPath::SmaG,
            "H" => RfPath::SmaH,
            "ANT" => RfPath::EmbedAnt,
            "LOOPBACK" => RfPath::Loopback,
            _ => return Err(RxError::UnknownAntenna(s.to_string())),
        };
        Ok(path)
    }
}

/// Bitmask of receive channels whose pending configuration should be pushed
/// to the hardware in one apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyMask(u16);

impl ApplyMask {
    pub const NONE: ApplyMask = ApplyMask(0);

    pub fn channel(ch: usize) -> Self {
        debug_assert!(ch < MAX_RX_CHAN_COUNT);
        ApplyMask(1 << ch)
    }

    pub fn with(self, ch: usize) -> Self {
        ApplyMask(self.0 | Self::channel(ch).0)
    }

    pub fn contains(self, ch: usize) -> bool {
        ch < MAX_RX_CHAN_COUNT && self.0 & (1 << ch) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The channel index when exactly one channel is selected
    pub fn single(self) -> Option<usize> {
        if self.0.count_ones() == 1 {
            Some(self.0.trailing_zeros() as usize)
        } else {
            None
        }
    }

    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..MAX_RX_CHAN_COUNT).filter(move |&ch| self.contains(ch))
    }
}

impl FromIterator<usize> for ApplyMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        iter.into_iter().fold(ApplyMask::NONE, ApplyMask::with)
    }
}

/// Per-channel receive configuration mirrored between host and hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub enable: bool,
    /// Center frequency in Hz
    pub freq: u64,
    pub freq_min: u64,
    pub freq_max: u64,
    pub path: RfPath,
    pub path_preferred: RfPath,
    pub path_possible: Vec<RfPath>,
    /// Sample rate divisor applied to the DCS clock (1 or 2)
    pub samp_freq_div_n: u8,
    /// Gain in dB
    pub gain: i8,
    pub gain_min: i8,
    pub gain_max: i8,
    /// RFIC low-pass filter bandwidth in MHz
    pub rfic_lpf_bw: u16,
}

impl ChannelConfig {
    /// Reset the tunable fields to power-on defaults, keeping the
    /// hardware-reported capabilities.
    pub fn reset_defaults(&mut self) {
        self.enable = false;
        self.freq = 2_450_000_000;
        self.path = self.path_preferred;
        self.samp_freq_div_n = 1;
        self.gain = 0;
        self.rfic_lpf_bw = 80;
    }
}

/// Daughterboard descriptor as reported by the motherboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Daughterboard {
    pub board_id: u8,
    pub name: String,
    pub rx_ch_cnt: usize,
    pub tx_ch_cnt: usize,
}

/// Static hardware description read once when the device is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct HwInfo {
    pub serial: String,
    pub daughterboards: [Option<Daughterboard>; 2],
    /// Sample clock in Hz
    pub dcs_clk: f64,
    /// Capabilities and power-on state of every receive channel the
    /// hardware reports, in channel order.
    pub rx_channels: Vec<ChannelConfig>,
}

impl HwInfo {
    /// Receive channels reported across both daughterboards
    pub fn rx_ch_cnt(&self) -> usize {
        self.daughterboards
            .iter()
            .flatten()
            .map(|db| db.rx_ch_cnt)
            .sum()
    }
}
