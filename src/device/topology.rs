//! RX channel topology of the AD9361 and the mapping from a selected RF port
//! to channels, status registers and (in single-RX mode) the port steering
//! register write.

use super::constants::*;
use crate::stream_config::RfPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// `2rx-2tx`: both receivers run, each with its own phy and data channels.
    DualRx,
    /// `1rx-1tx`: one shared receive path, steered to a port through the
    /// enable/filter control register.
    SingleRx,
}

impl Topology {
    /// Decode the value of the `adi,2rx-2tx-mode-enable` debug attribute.
    pub fn from_mode_flag(flag: i64) -> Topology {
        if flag == 1 {
            Topology::DualRx
        } else {
            Topology::SingleRx
        }
    }

    /// Phy channel carrying gain, bandwidth and sample rate for `port`.
    pub fn rx_phy_channel(self, port: RfPort) -> &'static str {
        match (self, port) {
            (Topology::DualRx, RfPort::Rx2) => "voltage1",
            _ => "voltage0",
        }
    }

    /// Data device (I, Q) channel pair delivering samples for `port`.
    pub fn data_channels(self, port: RfPort) -> (&'static str, &'static str) {
        match (self, port) {
            (Topology::DualRx, RfPort::Rx2) => ("voltage2", "voltage3"),
            _ => ("voltage0", "voltage1"),
        }
    }

    /// Phy register holding the overload flag of the active receiver.
    pub fn overdrive_register(self, port: RfPort) -> u32 {
        match (self, port) {
            (Topology::DualRx, RfPort::Rx2) => REG_OVERDRIVE_RX2,
            _ => REG_OVERDRIVE_RX1,
        }
    }

    /// Register sequence needed to route the shared receiver to `port`.
    /// Dual-RX mode needs none: the port is chosen by channel selection.
    pub fn port_steering(self, port: RfPort) -> Option<PortSteering> {
        match self {
            Topology::DualRx => None,
            Topology::SingleRx => {
                let rx_num = port.index() as u32 + 1;
                Some(PortSteering {
                    register: REG_RX_ENABLE_FILTER_CTRL,
                    select_bits: rx_num << REG_RX_PORT_SHIFT,
                    rx_num: rx_num as i64,
                })
            }
        }
    }
}

/// Read-modify-write of the enable/filter control register followed by the
/// driver's `use-rx-num` debug attribute. Not atomic against another
/// concurrent steering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSteering {
    pub register: u32,
    pub select_bits: u32,
    pub rx_num: i64,
}

impl PortSteering {
    /// New register value given the value currently read back.
    pub fn apply(&self, current: u32) -> u32 {
        (current & REG_RX_PORT_KEEP_MASK) | self.select_bits
    }
}
