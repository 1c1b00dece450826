pub mod constants;
pub use constants::*;
#[cfg(feature = "libiio")]
pub mod libiio;
pub mod topology;
#[cfg(test)]
pub(crate) mod mock_device_handle;

use crate::error::{PlutoError, Result};
use crate::stream_config::{self, RfPort};
use log::{debug, error, info};
use topology::{PortSteering, Topology};

#[cfg(test)]
mod device_test;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Phy,
    Data,
}

impl DeviceKind {
    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Phy => PHY_DEVICE,
            DeviceKind::Data => DATA_DEVICE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub device: DeviceKind,
    pub name: &'static str,
    pub output: bool,
}

impl ChannelId {
    pub const fn phy_input(name: &'static str) -> Self {
        ChannelId {
            device: DeviceKind::Phy,
            name,
            output: false,
        }
    }
    pub const fn phy_output(name: &'static str) -> Self {
        ChannelId {
            device: DeviceKind::Phy,
            name,
            output: true,
        }
    }
    pub const fn data_input(name: &'static str) -> Self {
        ChannelId {
            device: DeviceKind::Data,
            name,
            output: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
}

/// Operations the driver needs from an opened IIO context.
///
/// Calls may come from the control path and the acquisition thread at the
/// same time; every method is a single hardware transaction.
pub trait DeviceHandle: Send + Sync {
    fn has_device(&self, dev: DeviceKind) -> bool;
    fn has_channel(&self, chan: ChannelId) -> bool;
    fn write_channel_attr(&self, chan: ChannelId, attr: &str, value: AttrValue) -> Result<()>;
    fn read_debug_attr(&self, dev: DeviceKind, attr: &str) -> Result<i64>;
    fn write_debug_attr(&self, dev: DeviceKind, attr: &str, value: i64) -> Result<()>;
    fn read_reg(&self, dev: DeviceKind, addr: u32) -> Result<u32>;
    fn write_reg(&self, dev: DeviceKind, addr: u32, value: u32) -> Result<()>;
    fn set_channel_enabled(&self, chan: ChannelId, enable: bool) -> Result<()>;
    /// Number of DMA blocks the kernel queues for the data device.
    fn set_kernel_buffers_count(&self, count: u32) -> Result<()>;
    fn create_buffer(&self, samples: usize) -> Result<()>;
    /// Block until the next DMA block is ready and copy it into `dst`.
    fn refill(&self, dst: &mut [u8]) -> Result<usize>;
    fn destroy_buffer(&self);
}

/// Opens a [`DeviceHandle`] for a connection URI such as `usb:1.18.5` or
/// `ip:192.168.2.1`.
pub trait Backend: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn DeviceHandle>>;
}

impl<F> Backend for F
where
    F: Fn(&str) -> Result<Box<dyn DeviceHandle>> + Send + Sync,
{
    fn open(&self, uri: &str) -> Result<Box<dyn DeviceHandle>> {
        self(uri)
    }
}

/// Channels resolved for one streaming session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSet {
    pub topology: Topology,
    pub port: RfPort,
    pub rx: ChannelId,
    pub rx_lo: ChannelId,
    pub tx_lo: ChannelId,
    pub data_i: ChannelId,
    pub data_q: ChannelId,
}

/// An opened IIO context with its phy and data devices.
pub struct Device {
    handle: Box<dyn DeviceHandle>,
    uri: String,
}

impl Device {
    pub fn open(backend: &dyn Backend, uri: &str) -> Result<Device> {
        let handle = match backend.open(uri) {
            Ok(h) => h,
            Err(e) => {
                error!("Could not open pluto ({}): {}", uri, e);
                return Err(match e {
                    PlutoError::DeviceNotFound(_) => e,
                    other => PlutoError::DeviceNotFound(format!("{}: {}", uri, other)),
                });
            }
        };
        Device::from_handle(handle, uri)
    }

    /// Checks both mandatory sub-devices. On failure the handle is dropped,
    /// which releases the context.
    pub(crate) fn from_handle(handle: Box<dyn DeviceHandle>, uri: &str) -> Result<Device> {
        for dev in [DeviceKind::Phy, DeviceKind::Data] {
            if !handle.has_device(dev) {
                error!("Could not connect to pluto {}", dev.name());
                return Err(PlutoError::SubdeviceMissing(dev.name().to_string()));
            }
        }
        info!("Opened pluto context {}", uri);
        Ok(Device {
            handle,
            uri: uri.to_string(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn topology(&self) -> Result<Topology> {
        let flag = self.handle.read_debug_attr(DeviceKind::Phy, DBG_2RX_2TX_MODE)?;
        Ok(Topology::from_mode_flag(flag))
    }

    /// Resolve the channels for `port`, steering the shared receiver first
    /// when the front-end runs in single-RX mode.
    pub fn select_rx_channel(&self, port: RfPort) -> Result<ChannelSet> {
        let topology = self.topology()?;
        stream_config::apply_rf_port(self, topology, port)?;
        let (data_i, data_q) = topology.data_channels(port);
        let set = ChannelSet {
            topology,
            port,
            rx: ChannelId::phy_input(topology.rx_phy_channel(port)),
            rx_lo: ChannelId::phy_output(RX_LO_CHANNEL),
            tx_lo: ChannelId::phy_output(TX_LO_CHANNEL),
            data_i: ChannelId::data_input(data_i),
            data_q: ChannelId::data_input(data_q),
        };
        for chan in [set.rx, set.rx_lo, set.tx_lo, set.data_i, set.data_q] {
            if !self.handle.has_channel(chan) {
                return Err(PlutoError::ChannelUnavailable(format!(
                    "{} {}",
                    chan.device.name(),
                    chan.name
                )));
            }
        }
        info!(
            "RX channel {} selected for {} ({:?})",
            set.rx.name,
            port.key(),
            topology
        );
        Ok(set)
    }

    pub fn steer_rx_port(&self, steering: PortSteering) -> Result<()> {
        let current = self.read_reg(DeviceKind::Phy, steering.register)?;
        self.write_reg(DeviceKind::Phy, steering.register, steering.apply(current))?;
        self.handle
            .write_debug_attr(DeviceKind::Phy, DBG_1RX_1TX_RX_NUM, steering.rx_num)
            .map_err(|e| write_failure(DBG_1RX_1TX_RX_NUM, e))
    }

    pub fn write_attr(&self, chan: ChannelId, attr: &str, value: AttrValue) -> Result<()> {
        debug!("write {}/{} {} = {:?}", chan.device.name(), chan.name, attr, value);
        self.handle
            .write_channel_attr(chan, attr, value)
            .map_err(|e| write_failure(attr, e))
    }

    pub fn read_reg(&self, dev: DeviceKind, addr: u32) -> Result<u32> {
        self.handle.read_reg(dev, addr)
    }

    pub fn write_reg(&self, dev: DeviceKind, addr: u32, value: u32) -> Result<()> {
        self.handle
            .write_reg(dev, addr, value)
            .map_err(|e| write_failure(&format!("register {:#010x}", addr), e))
    }

    pub fn set_channels_enabled(&self, chans: &[(ChannelId, bool)]) -> Result<()> {
        for &(chan, enable) in chans {
            self.handle.set_channel_enabled(chan, enable)?;
        }
        Ok(())
    }

    pub fn create_buffer(&self, kernel_buffers: u32, samples: usize) -> Result<()> {
        self.handle.set_kernel_buffers_count(kernel_buffers)?;
        self.handle.create_buffer(samples)
    }

    pub fn refill(&self, dst: &mut [u8]) -> Result<usize> {
        self.handle.refill(dst)
    }

    pub fn destroy_buffer(&self) {
        self.handle.destroy_buffer()
    }

    /// Release the hardware context.
    pub fn close(self) {
        info!("Closing pluto context {}", self.uri);
    }
}

fn write_failure(what: &str, e: PlutoError) -> PlutoError {
    if e.is_fatal() {
        return e;
    }
    PlutoError::HardwareWrite(format!("{}: {}", what, e))
}
