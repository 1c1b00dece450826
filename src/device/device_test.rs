// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use mockall::predicate::{always, eq};
use mockall::Sequence;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::mock_device_handle::{healthy_handle, MockHandle};
use crate::device::{AttrValue, ChannelId, Device, DeviceHandle, DeviceKind};
use crate::error::{PlutoError, Result};
use crate::stream_config::RfPort;

use super::topology::Topology;
use super::{DBG_1RX_1TX_RX_NUM, DBG_2RX_2TX_MODE, REG_RX_ENABLE_FILTER_CTRL};

fn boxed(mock: MockHandle) -> Result<Box<dyn DeviceHandle>> {
    Ok(Box::new(mock))
}

#[test]
fn test_open_resolves_both_subdevices() {
    let backend = |uri: &str| -> Result<Box<dyn DeviceHandle>> {
        assert_eq!(uri, "ip:192.168.2.1");
        let mut mock = MockHandle::new();
        mock.expect_has_device()
            .with(eq(DeviceKind::Phy))
            .times(1)
            .return_const(true);
        mock.expect_has_device()
            .with(eq(DeviceKind::Data))
            .times(1)
            .return_const(true);
        boxed(mock)
    };
    let device = Device::open(&backend, "ip:192.168.2.1").unwrap();
    assert_eq!(device.uri(), "ip:192.168.2.1");
}

#[test]
fn test_open_missing_data_device_releases_context() {
    let drops = Arc::new(AtomicUsize::new(0));
    let counter = drops.clone();
    let backend = move |_: &str| -> Result<Box<dyn DeviceHandle>> {
        let mut mock = MockHandle::new();
        mock.expect_has_device()
            .with(eq(DeviceKind::Phy))
            .return_const(true);
        mock.expect_has_device()
            .with(eq(DeviceKind::Data))
            .return_const(false);
        Ok(Box::new(DropCounter {
            inner: mock,
            drops: counter.clone(),
        }))
    };
    match Device::open(&backend, "usb:1.2.5") {
        Err(PlutoError::SubdeviceMissing(name)) => assert_eq!(name, "cf-ad9361-lpc"),
        _ => panic!("expected missing data device"),
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_open_missing_phy_never_checks_data() {
    let backend = |_: &str| -> Result<Box<dyn DeviceHandle>> {
        let mut mock = MockHandle::new();
        mock.expect_has_device()
            .with(eq(DeviceKind::Phy))
            .times(1)
            .return_const(false);
        boxed(mock)
    };
    assert!(matches!(
        Device::open(&backend, "usb:"),
        Err(PlutoError::SubdeviceMissing(_))
    ));
}

#[test]
fn test_open_context_failure_is_device_not_found() {
    let backend = |_: &str| -> Result<Box<dyn DeviceHandle>> {
        Err(std::io::Error::from_raw_os_error(2).into())
    };
    assert!(matches!(
        Device::open(&backend, "ip:10.0.0.1"),
        Err(PlutoError::DeviceNotFound(_))
    ));
}

#[test]
fn test_select_rx_channel_single_rx_steers_before_resolving() {
    let mut mock = healthy_handle(0);
    let mut seq = Sequence::new();
    mock.expect_read_reg()
        .with(eq(DeviceKind::Phy), eq(REG_RX_ENABLE_FILTER_CTRL))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(0x5f));
    mock.expect_write_reg()
        .with(eq(DeviceKind::Phy), eq(REG_RX_ENABLE_FILTER_CTRL), eq(0x9f))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(()));
    mock.expect_write_debug_attr()
        .with(eq(DeviceKind::Phy), eq(DBG_1RX_1TX_RX_NUM), eq(2))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(()));

    let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
    let set = device.select_rx_channel(RfPort::Rx2).unwrap();
    assert_eq!(set.topology, Topology::SingleRx);
    assert_eq!(set.rx, ChannelId::phy_input("voltage0"));
    assert_eq!(set.data_i, ChannelId::data_input("voltage0"));
    assert_eq!(set.data_q, ChannelId::data_input("voltage1"));
}

#[test]
fn test_select_rx_channel_dual_rx_picks_second_receiver() {
    let mut mock = healthy_handle(1);
    mock.expect_read_reg().never();
    mock.expect_write_reg().never();
    mock.expect_write_debug_attr().never();

    let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
    let set = device.select_rx_channel(RfPort::Rx2).unwrap();
    assert_eq!(set.topology, Topology::DualRx);
    assert_eq!(set.rx, ChannelId::phy_input("voltage1"));
    assert_eq!(set.data_i, ChannelId::data_input("voltage2"));
    assert_eq!(set.data_q, ChannelId::data_input("voltage3"));
}

#[test]
fn test_select_rx_channel_missing_channel() {
    let mut mock = MockHandle::new();
    mock.expect_has_device().return_const(true);
    mock.expect_read_debug_attr()
        .with(eq(DeviceKind::Phy), eq(DBG_2RX_2TX_MODE))
        .returning(|_, _| Ok(1));
    mock.expect_has_channel()
        .returning(|chan| chan.device != DeviceKind::Data);

    let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
    assert!(matches!(
        device.select_rx_channel(RfPort::Rx1),
        Err(PlutoError::ChannelUnavailable(_))
    ));
}

#[test]
fn test_write_attr_failure_is_hardware_write() {
    let mut mock = healthy_handle(1);
    mock.expect_write_channel_attr()
        .with(
            eq(ChannelId::phy_output("altvoltage0")),
            eq("frequency"),
            eq(AttrValue::Int(100_000_000)),
        )
        .times(1)
        .returning(|_, _, _| Err(std::io::Error::from_raw_os_error(22).into()));

    let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
    let result = device.write_attr(
        ChannelId::phy_output("altvoltage0"),
        "frequency",
        AttrValue::Int(100_000_000),
    );
    assert!(matches!(result, Err(PlutoError::HardwareWrite(_))));
}

#[test]
fn test_write_attr_keeps_fatal_errors() {
    let mut mock = healthy_handle(1);
    mock.expect_write_channel_attr()
        .with(always(), always(), always())
        .returning(|_, _, _| Err(PlutoError::ChannelUnavailable("gone".to_string())));

    let device = Device::from_handle(Box::new(mock), "usb:").unwrap();
    let result = device.write_attr(ChannelId::phy_input("voltage0"), "hardwaregain", AttrValue::Float(10.0));
    assert!(matches!(result, Err(PlutoError::ChannelUnavailable(_))));
}

struct DropCounter {
    inner: MockHandle,
    drops: Arc<AtomicUsize>,
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl DeviceHandle for DropCounter {
    fn has_device(&self, dev: DeviceKind) -> bool {
        self.inner.has_device(dev)
    }
    fn has_channel(&self, chan: ChannelId) -> bool {
        self.inner.has_channel(chan)
    }
    fn write_channel_attr(&self, chan: ChannelId, attr: &str, value: AttrValue) -> Result<()> {
        self.inner.write_channel_attr(chan, attr, value)
    }
    fn read_debug_attr(&self, dev: DeviceKind, attr: &str) -> Result<i64> {
        self.inner.read_debug_attr(dev, attr)
    }
    fn write_debug_attr(&self, dev: DeviceKind, attr: &str, value: i64) -> Result<()> {
        self.inner.write_debug_attr(dev, attr, value)
    }
    fn read_reg(&self, dev: DeviceKind, addr: u32) -> Result<u32> {
        self.inner.read_reg(dev, addr)
    }
    fn write_reg(&self, dev: DeviceKind, addr: u32, value: u32) -> Result<()> {
        self.inner.write_reg(dev, addr, value)
    }
    fn set_channel_enabled(&self, chan: ChannelId, enable: bool) -> Result<()> {
        self.inner.set_channel_enabled(chan, enable)
    }
    fn set_kernel_buffers_count(&self, count: u32) -> Result<()> {
        self.inner.set_kernel_buffers_count(count)
    }
    fn create_buffer(&self, samples: usize) -> Result<()> {
        self.inner.create_buffer(samples)
    }
    fn refill(&self, dst: &mut [u8]) -> Result<usize> {
        self.inner.refill(dst)
    }
    fn destroy_buffer(&self) {
        self.inner.destroy_buffer()
    }
}
