use std::time::Duration;

// IIO devices
pub const PHY_DEVICE: &str = "ad9361-phy";
pub const DATA_DEVICE: &str = "cf-ad9361-lpc";

// Phy channels
pub const RX_LO_CHANNEL: &str = "altvoltage0";
pub const TX_LO_CHANNEL: &str = "altvoltage1";

// Channel attributes
pub const ATTR_POWERDOWN: &str = "powerdown";
pub const ATTR_RF_PORT_SELECT: &str = "rf_port_select";
pub const ATTR_FREQUENCY: &str = "frequency";
pub const ATTR_SAMPLING_FREQUENCY: &str = "sampling_frequency";
pub const ATTR_HARDWARE_GAIN: &str = "hardwaregain";
pub const ATTR_GAIN_CONTROL_MODE: &str = "gain_control_mode";
pub const ATTR_RF_BANDWIDTH: &str = "rf_bandwidth";

pub const RF_PORT_BALANCED: &str = "A_BALANCED";

// Debug attributes of the phy
pub const DBG_2RX_2TX_MODE: &str = "adi,2rx-2tx-mode-enable";
pub const DBG_1RX_1TX_RX_NUM: &str = "adi,1rx-1tx-mode-use-rx-num";

// Phy registers
pub const REG_RX_ENABLE_FILTER_CTRL: u32 = 0x0000_0003;
pub const REG_RX_PORT_KEEP_MASK: u32 = 0x3f;
pub const REG_RX_PORT_SHIFT: u32 = 6;
pub const REG_OVERDRIVE_RX1: u32 = 0x0000_005e;
pub const REG_OVERDRIVE_RX2: u32 = 0x0000_005f;
pub const OVERDRIVE_BIT: u32 = 0x1;

// Data device (HDL core) registers
pub const REG_ADC_STATUS: u32 = 0x8000_0088;
pub const ADC_STATUS_UNDERFLOW: u32 = 0x4;
pub const REG_DECIMATION: u32 = 0xc120_0000;

// USB discovery
pub struct UsbDeviceSignature {
    pub vid: u16,
    pub pid: u16,
    pub description: &'static str,
}
pub const KNOWN_DEVICES: &[UsbDeviceSignature; 1] = &[UsbDeviceSignature {
    vid: 0x0456,
    pid: 0xb673,
    description: "Analog Devices ADALM-PLUTO",
}];

/// Substrings of a context description that mark a supported AD9361 board.
pub const MODEL_WHITELIST: &[&str] = &["PlutoSDR", "ANTSDR", "LibreSDR", "Pluto+", "ad9361", "FISH"];

pub const IIO_INTERFACE_NAME: &str = "IIO";
pub const DEFAULT_NETWORK_HOST: &str = "192.168.2.1";
pub const USB_STRING_TIMEOUT: Duration = Duration::from_millis(300);
