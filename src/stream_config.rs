//! Validated receive parameters and the writes that push them to the phy.

use crate::device::topology::Topology;
use crate::device::{
    AttrValue, ChannelSet, Device, ATTR_FREQUENCY, ATTR_GAIN_CONTROL_MODE, ATTR_HARDWARE_GAIN,
    ATTR_POWERDOWN, ATTR_RF_BANDWIDTH, ATTR_RF_PORT_SELECT, ATTR_SAMPLING_FREQUENCY,
    RF_PORT_BALANCED,
};
use crate::error::Result;
use log::info;

pub const MIN_SAMPLE_RATE: u32 = 2_500_000;
pub const MAX_SAMPLE_RATE: u32 = 61_440_000;
pub const SAMPLE_RATE_STEP: u32 = 500_000;
pub const DEFAULT_SAMPLE_RATE: u32 = 4_000_000;

pub const MIN_BANDWIDTH: u32 = 1_000_000;
/// Widest analog filter the AD9361 supports.
pub const MAX_BANDWIDTH: u32 = 52_000_000;
pub const BANDWIDTH_STEP: u32 = 500_000;
pub const AUTO_BANDWIDTH: u32 = 0;

pub const MIN_GAIN: f32 = -1.0;
pub const MAX_GAIN: f32 = 73.0;
/// Leave the gain to the front-end's gain control.
pub const AUTO_GAIN: f32 = -1.0;

pub const DEFAULT_FREQUENCY: f64 = 100_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainMode {
    Manual,
    FastAttack,
    SlowAttack,
    Hybrid,
}

impl GainMode {
    pub const ALL: [GainMode; 4] = [
        GainMode::Manual,
        GainMode::FastAttack,
        GainMode::SlowAttack,
        GainMode::Hybrid,
    ];

    /// Value of the `gain_control_mode` attribute, also the settings key.
    pub fn key(self) -> &'static str {
        match self {
            GainMode::Manual => "manual",
            GainMode::FastAttack => "fast_attack",
            GainMode::SlowAttack => "slow_attack",
            GainMode::Hybrid => "hybrid",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GainMode::Manual => "Manual",
            GainMode::FastAttack => "Fast Attack",
            GainMode::SlowAttack => "Slow Attack",
            GainMode::Hybrid => "Hybrid",
        }
    }

    /// Unknown keys fall back to manual.
    pub fn from_key(key: &str) -> GainMode {
        GainMode::ALL
            .into_iter()
            .find(|m| m.key() == key)
            .unwrap_or(GainMode::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfPort {
    Rx1,
    Rx2,
}

impl RfPort {
    pub fn index(self) -> usize {
        match self {
            RfPort::Rx1 => 0,
            RfPort::Rx2 => 1,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            RfPort::Rx1 => "rx1",
            RfPort::Rx2 => "rx2",
        }
    }

    pub fn from_key(key: &str) -> RfPort {
        match key {
            "rx2" => RfPort::Rx2,
            _ => RfPort::Rx1,
        }
    }
}

/// Sample transfer format of the data device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqMode {
    /// 16-bit I and Q.
    Wide,
    /// 8-bit samples carried on the I channel, Q channel disabled.
    Narrow,
}

impl IqMode {
    pub fn key(self) -> &'static str {
        match self {
            IqMode::Wide => "cs16",
            IqMode::Narrow => "cs8",
        }
    }

    pub fn from_key(key: &str) -> IqMode {
        match key {
            "cs8" => IqMode::Narrow,
            _ => IqMode::Wide,
        }
    }

    /// Raw bytes per complex sample in a refilled buffer.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            IqMode::Wide => 4,
            IqMode::Narrow => 2,
        }
    }
}

/// Valid sample rates, lowest first.
pub fn sample_rates() -> Vec<u32> {
    let mut rates: Vec<u32> = (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE)
        .step_by(SAMPLE_RATE_STEP as usize)
        .collect();
    if rates.last() != Some(&MAX_SAMPLE_RATE) {
        rates.push(MAX_SAMPLE_RATE);
    }
    rates
}

/// Valid bandwidths; entry 0 is automatic.
pub fn bandwidths() -> Vec<u32> {
    let mut bws = vec![AUTO_BANDWIDTH];
    bws.extend((MIN_BANDWIDTH..=MAX_BANDWIDTH).step_by(BANDWIDTH_STEP as usize));
    bws
}

/// Values outside the table snap to its first entry.
pub fn normalize_sample_rate(rate: u32) -> u32 {
    let rates = sample_rates();
    if rates.contains(&rate) {
        rate
    } else {
        rates[0]
    }
}

pub fn normalize_bandwidth(bw: u32) -> u32 {
    let bws = bandwidths();
    if bws.contains(&bw) {
        bw
    } else {
        bws[0]
    }
}

pub fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        return AUTO_GAIN;
    }
    gain.clamp(MIN_GAIN, MAX_GAIN)
}

/// Human readable frequency, e.g. `2.5MHz`.
pub fn format_hz(hz: f64) -> String {
    if hz >= 1_000_000.0 {
        format!("{:.1}MHz", hz / 1_000_000.0)
    } else if hz >= 1_000.0 {
        format!("{:.1}KHz", hz / 1_000.0)
    } else {
        format!("{:.1}Hz", hz)
    }
}

pub fn sample_rate_options() -> Vec<(u32, String)> {
    sample_rates()
        .into_iter()
        .map(|sr| (sr, format_hz(sr as f64)))
        .collect()
}

pub fn bandwidth_options() -> Vec<(u32, String)> {
    bandwidths()
        .into_iter()
        .map(|bw| {
            let label = if bw == AUTO_BANDWIDTH {
                "Auto".to_string()
            } else {
                format_hz(bw as f64)
            };
            (bw, label)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    frequency: f64,
    sample_rate: u32,
    bandwidth: u32,
    gain: f32,
    gain_mode: GainMode,
    rf_port: RfPort,
    iq_mode: IqMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            frequency: DEFAULT_FREQUENCY,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bandwidth: AUTO_BANDWIDTH,
            gain: AUTO_GAIN,
            gain_mode: GainMode::Manual,
            rf_port: RfPort::Rx1,
            iq_mode: IqMode::Wide,
        }
    }
}

impl StreamConfig {
    pub fn frequency(&self) -> f64 {
        self.frequency
    }
    pub fn set_frequency(&mut self, freq: f64) {
        self.frequency = freq;
    }
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = normalize_sample_rate(rate);
    }
    pub fn bandwidth(&self) -> u32 {
        self.bandwidth
    }
    pub fn set_bandwidth(&mut self, bw: u32) {
        self.bandwidth = normalize_bandwidth(bw);
    }
    pub fn gain(&self) -> f32 {
        self.gain
    }
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = clamp_gain(gain);
    }
    pub fn gain_mode(&self) -> GainMode {
        self.gain_mode
    }
    pub fn set_gain_mode(&mut self, mode: GainMode) {
        self.gain_mode = mode;
    }
    pub fn rf_port(&self) -> RfPort {
        self.rf_port
    }
    pub fn set_rf_port(&mut self, port: RfPort) {
        self.rf_port = port;
    }
    pub fn iq_mode(&self) -> IqMode {
        self.iq_mode
    }
    pub fn set_iq_mode(&mut self, mode: IqMode) {
        self.iq_mode = mode;
    }

    /// Bandwidth actually written: automatic follows the sample rate up to
    /// the analog filter's limit.
    pub fn effective_bandwidth(&self) -> u32 {
        if self.bandwidth > 0 {
            self.bandwidth
        } else {
            self.sample_rate.min(MAX_BANDWIDTH)
        }
    }
}

/// Push the full configuration before streaming. The LO power states go
/// first so that the frequency lands on a running synthesizer.
pub(crate) fn apply_all(device: &Device, chans: &ChannelSet, config: &StreamConfig) -> Result<()> {
    device.write_attr(chans.tx_lo, ATTR_POWERDOWN, AttrValue::Bool(true))?;
    device.write_attr(chans.rx_lo, ATTR_POWERDOWN, AttrValue::Bool(false))?;
    device.write_attr(chans.rx, ATTR_RF_PORT_SELECT, AttrValue::Text(RF_PORT_BALANCED))?;
    retune(device, chans, config.frequency)?;
    device.write_attr(
        chans.rx,
        ATTR_SAMPLING_FREQUENCY,
        AttrValue::Int(config.sample_rate as i64),
    )?;
    apply_gain(device, chans, config.gain)?;
    apply_gain_mode(device, chans, config.gain_mode)?;
    set_bandwidth(device, chans, config)
}

pub(crate) fn set_bandwidth(device: &Device, chans: &ChannelSet, config: &StreamConfig) -> Result<()> {
    let bw = config.effective_bandwidth();
    device.write_attr(chans.rx, ATTR_RF_BANDWIDTH, AttrValue::Int(bw as i64))
}

pub(crate) fn retune(device: &Device, chans: &ChannelSet, freq: f64) -> Result<()> {
    device.write_attr(chans.rx_lo, ATTR_FREQUENCY, AttrValue::Int(freq.round() as i64))
}

/// Automatic gain is not written; the front-end keeps what its gain
/// control produces.
pub(crate) fn apply_gain(device: &Device, chans: &ChannelSet, gain: f32) -> Result<()> {
    if gain <= AUTO_GAIN {
        return Ok(());
    }
    device.write_attr(chans.rx, ATTR_HARDWARE_GAIN, AttrValue::Float(gain as f64))
}

pub(crate) fn apply_gain_mode(device: &Device, chans: &ChannelSet, mode: GainMode) -> Result<()> {
    device.write_attr(chans.rx, ATTR_GAIN_CONTROL_MODE, AttrValue::Text(mode.key()))
}

/// Route the shared receiver to `port`. Only single-RX mode has anything to
/// write; in dual-RX mode the port follows from channel selection.
pub(crate) fn apply_rf_port(device: &Device, topology: Topology, port: RfPort) -> Result<()> {
    match topology.port_steering(port) {
        Some(steering) => {
            info!("Steering shared RX path to {}", port.key());
            device.steer_rx_port(steering)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock_device_handle::healthy_handle;
    use crate::device::{ChannelId, DeviceKind};
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_sample_rate_table() {
        let rates = sample_rates();
        assert_eq!(rates[0], 2_500_000);
        assert_eq!(rates[1], 3_000_000);
        assert_eq!(*rates.last().unwrap(), 61_440_000);
        assert_eq!(rates[rates.len() - 2], 61_000_000);
        for pair in rates.windows(2).take(rates.len() - 2) {
            assert_eq!(pair[1] - pair[0], 500_000);
        }
    }

    #[test]
    fn test_sample_rate_always_in_table() {
        let rates = sample_rates();
        for input in [0, 1, 2_499_999, 2_500_000, 4_000_000, 4_000_001, 61_440_000, 70_000_000, u32::MAX] {
            assert!(rates.contains(&normalize_sample_rate(input)), "{}", input);
        }
        assert_eq!(normalize_sample_rate(4_000_000), 4_000_000);
        assert_eq!(normalize_sample_rate(4_100_000), 2_500_000);
    }

    #[test]
    fn test_bandwidth_normalization() {
        assert_eq!(normalize_bandwidth(0), 0);
        assert_eq!(normalize_bandwidth(1_000_000), 1_000_000);
        assert_eq!(normalize_bandwidth(52_000_000), 52_000_000);
        assert_eq!(normalize_bandwidth(52_500_000), 0);
        assert_eq!(normalize_bandwidth(1_200_000), 0);
    }

    #[test]
    fn test_effective_bandwidth() {
        let mut config = StreamConfig::default();
        config.set_sample_rate(4_000_000);
        assert_eq!(config.effective_bandwidth(), 4_000_000);
        config.set_sample_rate(61_440_000);
        assert_eq!(config.effective_bandwidth(), 52_000_000);
        config.set_bandwidth(20_000_000);
        assert_eq!(config.effective_bandwidth(), 20_000_000);
    }

    #[test]
    fn test_gain_clamped() {
        let mut config = StreamConfig::default();
        config.set_gain(80.0);
        assert_eq!(config.gain(), 73.0);
        config.set_gain(-10.0);
        assert_eq!(config.gain(), -1.0);
        config.set_gain(42.5);
        assert_eq!(config.gain(), 42.5);
        config.set_gain(f32::NAN);
        assert_eq!(config.gain(), -1.0);
    }

    #[test]
    fn test_keys_round_trip_and_fallback() {
        assert_eq!(GainMode::from_key("slow_attack"), GainMode::SlowAttack);
        assert_eq!(GainMode::from_key("bogus"), GainMode::Manual);
        assert_eq!(RfPort::from_key("rx2"), RfPort::Rx2);
        assert_eq!(RfPort::from_key("rx9"), RfPort::Rx1);
        assert_eq!(IqMode::from_key("cs8"), IqMode::Narrow);
        assert_eq!(IqMode::from_key(""), IqMode::Wide);
    }

    #[test]
    fn test_option_labels() {
        assert_eq!(format_hz(2_500_000.0), "2.5MHz");
        assert_eq!(format_hz(61_440_000.0), "61.4MHz");
        assert_eq!(format_hz(12_500.0), "12.5KHz");
        assert_eq!(format_hz(50.0), "50.0Hz");
        let bws = bandwidth_options();
        assert_eq!(bws[0], (0, "Auto".to_string()));
        assert_eq!(bws[1], (1_000_000, "1.0MHz".to_string()));
    }

    fn chans() -> ChannelSet {
        ChannelSet {
            topology: Topology::DualRx,
            port: RfPort::Rx1,
            rx: ChannelId::phy_input("voltage0"),
            rx_lo: ChannelId::phy_output("altvoltage0"),
            tx_lo: ChannelId::phy_output("altvoltage1"),
            data_i: ChannelId::data_input("voltage0"),
            data_q: ChannelId::data_input("voltage1"),
        }
    }

    #[test]
    fn test_apply_all_order() {
        let c = chans();
        let mut mock = healthy_handle(1);
        let mut seq = Sequence::new();
        let writes = [
            (c.tx_lo, "powerdown", AttrValue::Bool(true)),
            (c.rx_lo, "powerdown", AttrValue::Bool(false)),
            (c.rx, "rf_port_select", AttrValue::Text("A_BALANCED")),
            (c.rx_lo, "frequency", AttrValue::Int(433_920_000)),
            (c.rx, "sampling_frequency", AttrValue::Int(4_000_000)),
            (c.rx, "hardwaregain", AttrValue::Float(30.0)),
            (c.rx, "gain_control_mode", AttrValue::Text("manual")),
            (c.rx, "rf_bandwidth", AttrValue::Int(4_000_000)),
        ];
        for (chan, attr, value) in writes {
            mock.expect_write_channel_attr()
                .with(eq(chan), eq(attr), eq(value))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
        }
        let device = Device::from_handle(Box::new(mock), "usb:").unwrap();

        let mut config = StreamConfig::default();
        config.set_frequency(433_919_999.6);
        config.set_gain(30.0);
        apply_all(&device, &c, &config).unwrap();
    }

    #[test]
    fn test_apply_all_skips_auto_gain() {
        let mut mock = healthy_handle(1);
        mock.expect_write_channel_attr()
            .withf(|_, attr, _| attr != "hardwaregain")
            .times(7)
            .returning(|_, _, _| Ok(()));
        let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
        apply_all(&device, &chans(), &StreamConfig::default()).unwrap();
    }

    #[test]
    fn test_apply_all_stops_at_first_failure() {
        let mut mock = healthy_handle(1);
        mock.expect_write_channel_attr()
            .times(1)
            .returning(|_, _, _| Err(std::io::Error::from_raw_os_error(5).into()));
        let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
        assert!(apply_all(&device, &chans(), &StreamConfig::default()).is_err());
    }

    #[test]
    fn test_set_bandwidth_explicit_value() {
        let c = chans();
        let mut mock = healthy_handle(1);
        mock.expect_write_channel_attr()
            .with(eq(c.rx), eq("rf_bandwidth"), eq(AttrValue::Int(10_000_000)))
            .times(2)
            .returning(|_, _, _| Ok(()));
        let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
        let mut config = StreamConfig::default();
        config.set_bandwidth(10_000_000);
        set_bandwidth(&device, &c, &config).unwrap();
        set_bandwidth(&device, &c, &config).unwrap();
    }

    #[test]
    fn test_apply_rf_port_dual_rx_writes_nothing() {
        let mut mock = healthy_handle(1);
        mock.expect_write_reg().never();
        let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
        apply_rf_port(&device, Topology::DualRx, RfPort::Rx2).unwrap();
    }

    #[test]
    fn test_apply_rf_port_single_rx_steers() {
        let mut mock = healthy_handle(0);
        mock.expect_read_reg()
            .with(eq(DeviceKind::Phy), eq(0x03))
            .returning(|_, _| Ok(0x00));
        mock.expect_write_reg()
            .with(eq(DeviceKind::Phy), eq(0x03), eq(0x40))
            .times(1)
            .returning(|_, _, _| Ok(()));
        mock.expect_write_debug_attr()
            .with(eq(DeviceKind::Phy), eq("adi,1rx-1tx-mode-use-rx-num"), eq(1))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
        apply_rf_port(&device, Topology::SingleRx, RfPort::Rx1).unwrap();
    }
}
