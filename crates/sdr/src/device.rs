// Copyright 2025-2026 CEMAXECUTER LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::stream::StreamCore;
use crate::{
    ApplyError, ApplyMask, ChannelConfig, Direction, HwInfo, Result, RfPath, RxError,
    StreamFormat, Transport, MAX_RX_CHAN_COUNT, RX_PACKET_ELEM_CNT,
};

/// Device selector
#[derive(Debug, Clone, Default)]
pub struct DeviceArgs {
    /// Open only the board with this motherboard serial
    pub serial: Option<String>,
}

impl DeviceArgs {
    /// Build from `key=value` pairs, ignoring keys that do not apply.
    pub fn from_kwargs(kwargs: &HashMap<String, String>) -> Self {
        Self {
            serial: kwargs.get("serial").cloned(),
        }
    }
}

/// Enumeration result, one per attached board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub serial: String,
}

/// Describe a board the way enumeration reports it.
pub fn describe(hw: &HwInfo) -> DeviceInfo {
    let mut label = "RFNM".to_string();
    if let Some(db) = &hw.daughterboards[0] {
        label += &format!(" with {}", db.name);
    }
    match &hw.daughterboards[1] {
        Some(db) => label += &format!(" and {} daughterboards", db.name),
        None => label += " daughterboard",
    }

    DeviceInfo {
        device_id: "RFNM".to_string(),
        label,
        serial: hw.serial.clone(),
    }
}

/// An opened RFNM receiver: channel control plane plus the single receive
/// stream it can host.
///
/// All methods take `&self`; a `Device` can be shared between a control
/// thread adjusting tuning and the thread reading the stream.
pub struct Device<T: Transport> {
    pub(crate) transport: T,
    rx_chan_count: usize,
    pub(crate) channels: Mutex<Vec<ChannelConfig>>,
    pub(crate) dc_correction: [AtomicBool; MAX_RX_CHAN_COUNT],
    pub(crate) core: Mutex<StreamCore>,
}

impl<T: Transport> Device<T> {
    /// Take ownership of an opened transport and put every receive channel
    /// into its default state.
    pub fn open(transport: T) -> Result<Self> {
        let hw = transport.hwinfo();
        log::info!("opening RFNM (serial={})", hw.serial);

        let mut rx_chan_count = hw.rx_ch_cnt();
        if rx_chan_count > MAX_RX_CHAN_COUNT {
            log::error!("invalid channel count {} reported by hardware", rx_chan_count);
            rx_chan_count = MAX_RX_CHAN_COUNT;
        }
        if rx_chan_count > hw.rx_channels.len() {
            log::error!(
                "hardware reports {} rx channels but describes only {}",
                rx_chan_count,
                hw.rx_channels.len()
            );
            rx_chan_count = hw.rx_channels.len();
        }

        let mut channels = hw.rx_channels[..rx_chan_count].to_vec();
        for ch in channels.iter_mut() {
            ch.reset_defaults();
        }

        let device = Self {
            transport,
            rx_chan_count,
            channels: Mutex::new(Vec::new()),
            dc_correction: Default::default(),
            core: Mutex::new(StreamCore::new()),
        };

        let mask: ApplyMask = (0..rx_chan_count).collect();
        if !mask.is_empty() {
            device.apply(&channels, mask)?;
        }
        *device.channels.lock() = channels;

        Ok(device)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn driver_key(&self) -> &'static str {
        "RFNM"
    }

    pub fn hardware_key(&self) -> &'static str {
        "RFNM"
    }

    pub fn hardware_info(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Describe this board the way enumeration reports it
    pub fn info(&self) -> DeviceInfo {
        describe(self.transport.hwinfo())
    }

    pub fn num_channels(&self, dir: Direction) -> usize {
        match dir {
            Direction::Rx => self.rx_chan_count,
            Direction::Tx => 0,
        }
    }

    /// Largest element count a single read should ask for
    pub fn stream_mtu(&self) -> usize {
        RX_PACKET_ELEM_CNT * 16
    }

    pub fn stream_formats(&self) -> [StreamFormat; 3] {
        StreamFormat::supported()
    }

    pub fn native_stream_format(&self) -> (StreamFormat, f64) {
        StreamFormat::native()
    }

    pub(crate) fn check_channel(&self, channel: usize) -> Result<()> {
        if channel >= self.rx_chan_count {
            return Err(RxError::InvalidChannel(channel));
        }
        Ok(())
    }

    /// Read a field of one receive channel's configuration.
    fn get<R>(&self, channel: usize, f: impl FnOnce(&ChannelConfig) -> R) -> Result<R> {
        self.check_channel(channel)?;
        Ok(f(&self.channels.lock()[channel]))
    }

    /// Change one receive channel's configuration and push it to the
    /// hardware. The previous configuration is restored if the hardware
    /// rejects the change.
    fn update(&self, channel: usize, f: impl FnOnce(&mut ChannelConfig)) -> Result<()> {
        self.check_channel(channel)?;
        let mut channels = self.channels.lock();
        let previous = channels[channel].clone();
        f(&mut channels[channel]);
        if let Err(e) = self.apply(&channels, ApplyMask::channel(channel)) {
            channels[channel] = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Push the masked channels to the hardware, translating its result code.
    pub(crate) fn apply(&self, channels: &[ChannelConfig], mask: ApplyMask) -> Result<()> {
        let code = match self.transport.apply(channels, mask) {
            Ok(()) => return Ok(()),
            Err(code) => code,
        };

        let channel = mask.single().unwrap_or(0);
        let (freq, gain) = channels.get(channel).map_or((0, 0), |c| (c.freq, c.gain));

        let err = match code {
            ApplyError::TuneFail => {
                log::error!("Failure tuning channel {} to {} Hz", channel, freq);
                RxError::TuneFailure { channel, freq }
            }
            ApplyError::GainFail => {
                log::error!("Failure setting channel {} gain to {} dB", channel, gain);
                RxError::GainFailure { channel, gain }
            }
            ApplyError::Timeout => {
                log::error!("Timeout configuring RFNM");
                RxError::ConfigTimeout
            }
            ApplyError::TransportFail => {
                log::error!("USB failure configuring RFNM");
                RxError::TransportFailure("USB failure configuring RFNM".to_string())
            }
            ApplyError::Other(code) => {
                log::error!("Error {} configuring RFNM", code);
                RxError::Config(code)
            }
        };
        Err(err)
    }

    // --- sample rate ---

    pub fn list_sample_rates(&self, dir: Direction) -> Vec<f64> {
        match dir {
            Direction::Rx => {
                let clk = self.transport.hwinfo().dcs_clk;
                vec![clk, clk / 2.0]
            }
            Direction::Tx => Vec::new(),
        }
    }

    pub fn sample_rate(&self, dir: Direction, channel: usize) -> Result<f64> {
        if dir == Direction::Tx {
            return Ok(0.0);
        }
        let clk = self.transport.hwinfo().dcs_clk;
        self.get(channel, |c| clk / c.samp_freq_div_n as f64)
    }

    pub fn set_sample_rate(&self, dir: Direction, channel: usize, rate: f64) -> Result<()> {
        if dir == Direction::Tx {
            return Ok(());
        }
        self.check_channel(channel)?;
        let clk = self.transport.hwinfo().dcs_clk;
        let div = if rate == clk {
            1
        } else if rate == clk / 2.0 {
            2
        } else {
            return Err(RxError::UnsupportedSampleRate(rate));
        };
        self.update(channel, |c| c.samp_freq_div_n = div)
    }

    // --- frequency ---

    pub fn list_frequencies(&self, _dir: Direction, _channel: usize) -> Vec<&'static str> {
        vec!["RF"]
    }

    /// Tunable range in Hz
    pub fn frequency_range(&self, dir: Direction, channel: usize) -> Result<Option<(f64, f64)>> {
        if dir == Direction::Tx {
            return Ok(None);
        }
        self.get(channel, |c| Some((c.freq_min as f64, c.freq_max as f64)))
    }

    pub fn frequency(&self, dir: Direction, channel: usize) -> Result<f64> {
        if dir == Direction::Tx {
            return Ok(0.0);
        }
        self.get(channel, |c| c.freq as f64)
    }

    pub fn set_frequency(&self, dir: Direction, channel: usize, hz: f64) -> Result<()> {
        if dir == Direction::Tx {
            return Ok(());
        }
        self.update(channel, |c| c.freq = hz as u64)
    }

    // --- gain ---

    pub fn list_gains(&self, _dir: Direction, _channel: usize) -> Vec<&'static str> {
        vec!["RF"]
    }

    pub fn gain(&self, dir: Direction, channel: usize) -> Result<f64> {
        if dir == Direction::Tx {
            return Ok(0.0);
        }
        self.get(channel, |c| c.gain as f64)
    }

    pub fn set_gain(&self, dir: Direction, channel: usize, db: f64) -> Result<()> {
        if dir == Direction::Tx {
            return Ok(());
        }
        self.update(channel, |c| c.gain = db as i8)
    }

    pub fn gain_range(&self, dir: Direction, channel: usize) -> Result<(f64, f64)> {
        if dir == Direction::Tx {
            return Ok((0.0, 0.0));
        }
        self.get(channel, |c| (c.gain_min as f64, c.gain_max as f64))
    }

    // --- bandwidth ---

    pub fn bandwidth(&self, dir: Direction, channel: usize) -> Result<f64> {
        if dir == Direction::Tx {
            return Ok(0.0);
        }
        self.get(channel, |c| c.rfic_lpf_bw as f64 * 1e6)
    }

    /// Set the RFIC low-pass bandwidth. Zero means "leave unchanged".
    pub fn set_bandwidth(&self, dir: Direction, channel: usize, hz: f64) -> Result<()> {
        if dir == Direction::Tx {
            return Ok(());
        }
        self.check_channel(channel)?;
        if hz == 0.0 {
            return Ok(());
        }
        self.update(channel, |c| c.rfic_lpf_bw = (hz / 1e6) as u16)
    }

    pub fn bandwidth_range(&self, _dir: Direction, _channel: usize) -> Vec<(f64, f64)> {
        vec![(1e6, 100e6)]
    }

    // --- antenna ---

    pub fn list_antennas(&self, dir: Direction, channel: usize) -> Result<Vec<String>> {
        if dir == Direction::Tx {
            return Ok(Vec::new());
        }
        self.get(channel, |c| {
            c.path_possible
                .iter()
                .take(10)
                .map(|p| p.to_string())
                .collect()
        })
    }

    pub fn antenna(&self, dir: Direction, channel: usize) -> Result<String> {
        if dir == Direction::Tx {
            return Ok(String::new());
        }
        self.get(channel, |c| c.path.to_string())
    }

    pub fn set_antenna(&self, dir: Direction, channel: usize, name: &str) -> Result<()> {
        if dir == Direction::Tx {
            return Ok(());
        }
        self.check_channel(channel)?;
        let path: RfPath = name.parse()?;
        if !self.get(channel, |c| c.path_possible.contains(&path))? {
            return Err(RxError::UnknownAntenna(name.to_string()));
        }
        self.update(channel, |c| c.path = path)
    }

    // --- DC offset correction ---

    pub fn has_dc_offset_mode(&self, _dir: Direction, _channel: usize) -> bool {
        true
    }

    /// Enable or disable automatic DC correction. Takes effect from the
    /// next buffer the stream processes.
    pub fn set_dc_offset_mode(&self, dir: Direction, channel: usize, automatic: bool) -> Result<()> {
        if dir == Direction::Tx {
            return Ok(());
        }
        self.check_channel(channel)?;
        self.dc_correction[channel].store(automatic, Ordering::Relaxed);
        Ok(())
    }

    pub fn dc_offset_mode(&self, dir: Direction, channel: usize) -> Result<bool> {
        if dir == Direction::Tx {
            return Ok(false);
        }
        self.check_channel(channel)?;
        Ok(self.dc_correction[channel].load(Ordering::Relaxed))
    }

    /// Snapshot of one receive channel's configuration
    pub fn channel_config(&self, channel: usize) -> Result<ChannelConfig> {
        self.get(channel, ChannelConfig::clone)
    }
}

impl<T: Transport> Drop for Device<T> {
    fn drop(&mut self) {
        log::info!("closing RFNM (serial={})", self.transport.hwinfo().serial);
        self.transport.stop_transfer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimTransport, ToneSource};
    use crate::{Daughterboard, ErrorKind};
    use num_complex::Complex32;

    fn open_with(config: SimConfig) -> Device<SimTransport> {
        let src = ToneSource::new(4, 0.01, 0.5, Complex32::new(0.0, 0.0));
        let t = SimTransport::open(&DeviceArgs::default(), config, Box::new(src)).unwrap();
        Device::open(t).unwrap()
    }

    fn open_default() -> Device<SimTransport> {
        open_with(SimConfig::default())
    }

    fn board(name: &str, rx: usize) -> Option<Daughterboard> {
        Some(Daughterboard {
            board_id: 1,
            name: name.to_string(),
            rx_ch_cnt: rx,
            tx_ch_cnt: 0,
        })
    }

    #[test]
    fn test_open_applies_defaults() {
        let dev = open_default();
        assert_eq!(dev.num_channels(Direction::Rx), 2);
        assert_eq!(dev.num_channels(Direction::Tx), 0);
        for ch in 0..2 {
            let cfg = dev.channel_config(ch).unwrap();
            assert!(!cfg.enable);
            assert_eq!(cfg.freq, 2_450_000_000);
            assert_eq!(cfg.samp_freq_div_n, 1);
            assert_eq!(cfg.gain, 0);
            assert_eq!(cfg.rfic_lpf_bw, 80);
            assert_eq!(cfg.path, cfg.path_preferred);
        }
        assert_eq!(dev.stream_mtu(), RX_PACKET_ELEM_CNT * 16);
        assert_eq!(dev.driver_key(), "RFNM");
        assert_eq!(dev.hardware_key(), "RFNM");
        assert!(dev.hardware_info().is_empty());

        assert_eq!(
            dev.stream_formats(),
            [StreamFormat::Cs16, StreamFormat::Cf32, StreamFormat::Cs8]
        );
        assert_eq!(dev.native_stream_format(), (StreamFormat::Cs16, 32768.0));

        assert_eq!(dev.list_frequencies(Direction::Rx, 0), vec!["RF"]);
        assert_eq!(
            dev.frequency_range(Direction::Rx, 0).unwrap(),
            Some((600e6, 7.2e9))
        );
        assert_eq!(dev.frequency_range(Direction::Tx, 0).unwrap(), None);
        assert_eq!(dev.list_gains(Direction::Rx, 1), vec!["RF"]);
        assert_eq!(dev.bandwidth_range(Direction::Rx, 1), vec![(1e6, 100e6)]);
    }

    #[test]
    fn test_channel_count_is_clamped() {
        let config = SimConfig {
            daughterboards: [board("Granita", 3), board("Lime", 3)],
            ..SimConfig::default()
        };
        let dev = open_with(config);
        assert_eq!(dev.num_channels(Direction::Rx), MAX_RX_CHAN_COUNT);
    }

    #[test]
    fn test_describe_labels() {
        let mut config = SimConfig::default();
        assert_eq!(
            describe(&config.hwinfo()).label,
            "RFNM with Granita daughterboard"
        );
        config.daughterboards = [board("Granita", 2), board("Lime", 1)];
        let info = describe(&config.hwinfo());
        assert_eq!(info.label, "RFNM with Granita and Lime daughterboards");
        assert_eq!(info.device_id, "RFNM");
        assert_eq!(info.serial, config.serial);
    }

    #[test]
    fn test_channel_bounds() {
        let dev = open_default();
        let checks = [
            dev.set_frequency(Direction::Rx, 2, 1e9).err(),
            dev.set_gain(Direction::Rx, 5, 10.0).err(),
            dev.set_antenna(Direction::Rx, 2, "A").err(),
            dev.frequency(Direction::Rx, 2).err(),
            dev.set_dc_offset_mode(Direction::Rx, 3, true).err(),
        ];
        for err in checks {
            let err = err.expect("out of range channel must fail");
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn test_frequency_round_trip_and_failure_rolls_back() {
        let dev = open_default();
        dev.set_frequency(Direction::Rx, 1, 1_000_000_000.0).unwrap();
        assert_eq!(dev.frequency(Direction::Rx, 1).unwrap(), 1e9);

        let err = dev.set_frequency(Direction::Rx, 1, 100.0).unwrap_err();
        assert!(matches!(err, RxError::TuneFailure { channel: 1, freq: 100 }));
        assert_eq!(err.kind(), ErrorKind::Hardware);
        assert_eq!(dev.frequency(Direction::Rx, 1).unwrap(), 1e9, "rolled back");
    }

    #[test]
    fn test_gain_failure() {
        let dev = open_default();
        dev.set_gain(Direction::Rx, 0, 20.0).unwrap();
        assert_eq!(dev.gain(Direction::Rx, 0).unwrap(), 20.0);
        let err = dev.set_gain(Direction::Rx, 0, 90.0).unwrap_err();
        assert!(matches!(err, RxError::GainFailure { channel: 0, gain: 90 }));
        assert_eq!(dev.gain_range(Direction::Rx, 0).unwrap(), (-12.0, 60.0));
    }

    #[test]
    fn test_apply_error_mapping() {
        let dev = open_default();
        dev.transport().inject_apply_error(ApplyError::Timeout);
        assert!(matches!(
            dev.set_gain(Direction::Rx, 0, 1.0),
            Err(RxError::ConfigTimeout)
        ));
        dev.transport().inject_apply_error(ApplyError::TransportFail);
        assert!(matches!(
            dev.set_gain(Direction::Rx, 0, 1.0),
            Err(RxError::TransportFailure(_))
        ));
        dev.transport().inject_apply_error(ApplyError::Other(-7));
        assert!(matches!(
            dev.set_gain(Direction::Rx, 0, 1.0),
            Err(RxError::Config(-7))
        ));
    }

    #[test]
    fn test_sample_rates() {
        let dev = open_default();
        let rates = dev.list_sample_rates(Direction::Rx);
        assert_eq!(rates, vec![122_880_000.0, 61_440_000.0]);

        dev.set_sample_rate(Direction::Rx, 0, 61_440_000.0).unwrap();
        assert_eq!(dev.sample_rate(Direction::Rx, 0).unwrap(), 61_440_000.0);
        assert_eq!(dev.channel_config(0).unwrap().samp_freq_div_n, 2);

        let err = dev.set_sample_rate(Direction::Rx, 0, 10e6).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_bandwidth() {
        let dev = open_default();
        assert_eq!(dev.bandwidth(Direction::Rx, 0).unwrap(), 80e6);
        dev.set_bandwidth(Direction::Rx, 0, 20e6).unwrap();
        assert_eq!(dev.bandwidth(Direction::Rx, 0).unwrap(), 20e6);
        dev.set_bandwidth(Direction::Rx, 0, 0.0).unwrap();
        assert_eq!(dev.bandwidth(Direction::Rx, 0).unwrap(), 20e6, "zero is ignored");
    }

    #[test]
    fn test_antennas() {
        let dev = open_default();
        assert_eq!(
            dev.list_antennas(Direction::Rx, 0).unwrap(),
            vec!["A", "B", "C", "ANT"]
        );
        dev.set_antenna(Direction::Rx, 0, "ANT").unwrap();
        assert_eq!(dev.antenna(Direction::Rx, 0).unwrap(), "ANT");
        assert!(matches!(
            dev.set_antenna(Direction::Rx, 0, "LOOPBACK"),
            Err(RxError::UnknownAntenna(_))
        ));
        assert!(dev.list_antennas(Direction::Tx, 0).unwrap().is_empty());
    }

    #[test]
    fn test_dc_offset_mode() {
        let dev = open_default();
        assert!(dev.has_dc_offset_mode(Direction::Rx, 0));
        assert!(!dev.dc_offset_mode(Direction::Rx, 1).unwrap());
        dev.set_dc_offset_mode(Direction::Rx, 1, true).unwrap();
        assert!(dev.dc_offset_mode(Direction::Rx, 1).unwrap());
    }

    #[test]
    fn test_kwargs_selector() {
        let mut kw = HashMap::new();
        kw.insert("serial".to_string(), "ABC".to_string());
        kw.insert("driver".to_string(), "rfnm".to_string());
        assert_eq!(DeviceArgs::from_kwargs(&kw).serial.as_deref(), Some("ABC"));
    }
}
