//! Finding connected boards and turning them into connection URIs.

use crate::device::{
    DEFAULT_NETWORK_HOST, IIO_INTERFACE_NAME, KNOWN_DEVICES, MODEL_WHITELIST, USB_STRING_TIMEOUT,
};
use crate::error::Result;
use log::{info, warn};
use rusb::{Context, Language, UsbContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable, human readable key used for selection and settings.
    pub identity: String,
    /// IIO connection URI.
    pub uri: String,
}

impl DeviceInfo {
    /// Manually configured board reachable over the network.
    pub fn network(host: &str) -> DeviceInfo {
        DeviceInfo {
            identity: format!("{} (network)", host),
            uri: format!("ip:{}", host),
        }
    }

    pub fn default_network() -> DeviceInfo {
        DeviceInfo::network(DEFAULT_NETWORK_HOST)
    }
}

pub trait DeviceScanner {
    fn scan(&self) -> Result<Vec<DeviceInfo>>;
}

/// A fixed list, e.g. boards configured by hand.
impl DeviceScanner for Vec<DeviceInfo> {
    fn scan(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.clone())
    }
}

/// Enumerates USB-attached boards through libusb.
#[derive(Debug, Default)]
pub struct UsbScanner;

impl DeviceScanner for UsbScanner {
    fn scan(&self) -> Result<Vec<DeviceInfo>> {
        let context = Context::new()?;
        let mut found = Vec::new();
        for device in context.devices()?.iter() {
            let desc = device.device_descriptor()?;
            if !KNOWN_DEVICES
                .iter()
                .any(|d| d.vid == desc.vendor_id() && d.pid == desc.product_id())
            {
                continue;
            }
            match describe(&device, &desc) {
                Ok(Some(info)) => found.push(info),
                Ok(None) => {}
                Err(e) => warn!(
                    "Ignoring USB device {:04x}:{:04x} at {}.{}: {}",
                    desc.vendor_id(),
                    desc.product_id(),
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }
        let found = dedup(found);
        info!("Found {} pluto device(s)", found.len());
        Ok(found)
    }
}

fn describe<T: UsbContext>(
    device: &rusb::Device<T>,
    desc: &rusb::DeviceDescriptor,
) -> Result<Option<DeviceInfo>> {
    let handle = device.open()?;
    let lang: Language = match handle.read_languages(USB_STRING_TIMEOUT)?.first() {
        Some(lang) => *lang,
        None => return Ok(None),
    };
    let manufacturer = handle
        .read_manufacturer_string(lang, desc, USB_STRING_TIMEOUT)
        .unwrap_or_default();
    let product = handle
        .read_product_string(lang, desc, USB_STRING_TIMEOUT)
        .unwrap_or_default();
    let serial = handle
        .read_serial_number_string(lang, desc, USB_STRING_TIMEOUT)
        .unwrap_or_default();

    let description = format!("{} {}", manufacturer, product);
    if !is_supported(&description) {
        warn!("Ignoring unsupported device '{}'", description);
        return Ok(None);
    }

    let config = device.active_config_descriptor()?;
    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            let name = handle
                .read_interface_string(lang, &alt, USB_STRING_TIMEOUT)
                .unwrap_or_default();
            if name == IIO_INTERFACE_NAME {
                return Ok(Some(DeviceInfo {
                    identity: identity(
                        desc.vendor_id(),
                        desc.product_id(),
                        &description,
                        &serial,
                    ),
                    uri: usb_uri(device.bus_number(), device.address(), alt.interface_number()),
                }));
            }
        }
    }
    warn!("No {} interface on '{}'", IIO_INTERFACE_NAME, description);
    Ok(None)
}

pub fn is_supported(description: &str) -> bool {
    MODEL_WHITELIST.iter().any(|model| description.contains(model))
}

pub fn usb_uri(bus: u8, address: u8, interface: u8) -> String {
    format!("usb:{}.{}.{}", bus, address, interface)
}

pub fn identity(vid: u16, pid: u16, description: &str, serial: &str) -> String {
    format!("{:04x}:{:04x} ({}), serial={}", vid, pid, description, serial)
}

/// Keep the first entry for every identity and URI.
pub fn dedup(devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let mut out: Vec<DeviceInfo> = Vec::with_capacity(devices.len());
    for dev in devices {
        if out
            .iter()
            .any(|d| d.identity == dev.identity || d.uri == dev.uri)
        {
            warn!("Ignoring duplicate device '{}' ({})", dev.identity, dev.uri);
            continue;
        }
        out.push(dev);
    }
    out
}
