//! Per-cycle hardware fault polling.

use crate::device::topology::Topology;
use crate::device::{Device, DeviceKind, ADC_STATUS_UNDERFLOW, OVERDRIVE_BIT, REG_ADC_STATUS};
use crate::error::Result;
use crate::stream_config::RfPort;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareStatus {
    pub underflow: bool,
    pub overdrive: bool,
}

/// Latest status, written by the acquisition thread and read by anyone.
/// A reader may see a value one cycle old.
#[derive(Debug, Default)]
pub struct StatusCell {
    underflow: AtomicBool,
    overdrive: AtomicBool,
}

impl StatusCell {
    pub fn load(&self) -> HardwareStatus {
        HardwareStatus {
            underflow: self.underflow.load(Ordering::Relaxed),
            overdrive: self.overdrive.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self, status: HardwareStatus) {
        self.underflow.store(status.underflow, Ordering::Relaxed);
        self.overdrive.store(status.overdrive, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.store(HardwareStatus::default());
    }
}

/// Read the HDL core status register; a latched underflow is acknowledged by
/// writing the value back.
pub fn poll_underflow(device: &Device) -> Result<bool> {
    let val = device.read_reg(DeviceKind::Data, REG_ADC_STATUS)?;
    if val & ADC_STATUS_UNDERFLOW == 0 {
        return Ok(false);
    }
    device.write_reg(DeviceKind::Data, REG_ADC_STATUS, val)?;
    Ok(true)
}

/// Non-destructive read of the active receiver's overload flag.
pub fn poll_overdrive(device: &Device, port: RfPort, topology: Topology) -> Result<bool> {
    let val = device.read_reg(DeviceKind::Phy, topology.overdrive_register(port))?;
    Ok(val & OVERDRIVE_BIT != 0)
}

/// Clear whatever the status register latched before streaming began.
pub fn reset_underflow(device: &Device) -> Result<()> {
    let val = device.read_reg(DeviceKind::Data, REG_ADC_STATUS)?;
    device.write_reg(DeviceKind::Data, REG_ADC_STATUS, val)
}
