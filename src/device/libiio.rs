//! Production backend over the system libiio.

use super::{AttrValue, Backend, ChannelId, DeviceHandle, DeviceKind, DATA_DEVICE, PHY_DEVICE};
use crate::error::{PlutoError, Result};
use log::{debug, info};
use std::ffi::CString;
use std::io;
use std::os::raw::{c_char, c_double, c_int, c_longlong, c_uint, c_void};
use std::ptr;
use std::sync::{Mutex, MutexGuard};

type IioContext = c_void;
type IioDevice = c_void;
type IioChannel = c_void;
type IioBuffer = c_void;

// errno values that mean the data channel is gone
const EBADF: i32 = 9;
const ENXIO: i32 = 6;
const ENODEV: i32 = 19;

extern "C" {
    fn iio_create_context_from_uri(uri: *const c_char) -> *mut IioContext;
    fn iio_context_destroy(ctx: *mut IioContext);
    fn iio_context_find_device(ctx: *const IioContext, name: *const c_char) -> *mut IioDevice;
    fn iio_device_find_channel(
        dev: *const IioDevice,
        name: *const c_char,
        output: bool,
    ) -> *mut IioChannel;
    fn iio_channel_attr_write_bool(chn: *const IioChannel, attr: *const c_char, val: bool)
        -> c_int;
    fn iio_channel_attr_write_longlong(
        chn: *const IioChannel,
        attr: *const c_char,
        val: c_longlong,
    ) -> c_int;
    fn iio_channel_attr_write_double(
        chn: *const IioChannel,
        attr: *const c_char,
        val: c_double,
    ) -> c_int;
    fn iio_channel_attr_write(
        chn: *const IioChannel,
        attr: *const c_char,
        src: *const c_char,
    ) -> isize;
    fn iio_device_debug_attr_read_longlong(
        dev: *const IioDevice,
        attr: *const c_char,
        val: *mut c_longlong,
    ) -> c_int;
    fn iio_device_debug_attr_write_longlong(
        dev: *const IioDevice,
        attr: *const c_char,
        val: c_longlong,
    ) -> c_int;
    fn iio_device_reg_read(dev: *mut IioDevice, address: u32, value: *mut u32) -> c_int;
    fn iio_device_reg_write(dev: *mut IioDevice, address: u32, value: u32) -> c_int;
    fn iio_channel_enable(chn: *mut IioChannel);
    fn iio_channel_disable(chn: *mut IioChannel);
    fn iio_device_set_kernel_buffers_count(dev: *const IioDevice, nb_buffers: c_uint) -> c_int;
    fn iio_device_create_buffer(
        dev: *const IioDevice,
        samples_count: usize,
        cyclic: bool,
    ) -> *mut IioBuffer;
    fn iio_buffer_refill(buf: *mut IioBuffer) -> isize;
    fn iio_buffer_start(buf: *const IioBuffer) -> *mut c_void;
    fn iio_buffer_end(buf: *const IioBuffer) -> *mut c_void;
    fn iio_buffer_destroy(buf: *mut IioBuffer);
}

fn cstr(s: &str) -> Result<CString> {
    CString::new(s).map_err(|e| PlutoError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))
}

fn check(ret: c_int) -> Result<()> {
    if ret < 0 {
        return Err(io::Error::from_raw_os_error(-ret).into());
    }
    Ok(())
}

/// Copy the bytes between `start` and `end` into `dst`, truncated to its
/// length. A null start is a skipped cycle, not a fatal error.
///
/// # Safety
///
/// A non-null `start` must be valid for reads up to `end`.
unsafe fn copy_block(start: *const u8, end: *const u8, dst: &mut [u8]) -> Result<usize> {
    if start.is_null() {
        return Err(PlutoError::Acquisition("null buffer pointer".to_string()));
    }
    let len = (end as usize).saturating_sub(start as usize).min(dst.len());
    if len > 0 {
        ptr::copy_nonoverlapping(start, dst.as_mut_ptr(), len);
    }
    Ok(len)
}

/// Opens contexts through libiio.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibIio;

impl Backend for LibIio {
    fn open(&self, uri: &str) -> Result<Box<dyn DeviceHandle>> {
        Ok(Box::new(IioHandle::open(uri)?))
    }
}

struct BufferPtr(*mut IioBuffer);

struct IioHandle {
    ctx: *mut IioContext,
    phy: *mut IioDevice,
    data: *mut IioDevice,
    buffer: Mutex<BufferPtr>,
}

// libiio context calls are serialized by the library; the buffer pointer is
// only touched under its mutex.
unsafe impl Send for IioHandle {}
unsafe impl Sync for IioHandle {}

impl IioHandle {
    fn open(uri: &str) -> Result<IioHandle> {
        let c_uri = cstr(uri)?;
        let ctx = unsafe { iio_create_context_from_uri(c_uri.as_ptr()) };
        if ctx.is_null() {
            return Err(io::Error::last_os_error().into());
        }
        let phy_name = cstr(PHY_DEVICE)?;
        let data_name = cstr(DATA_DEVICE)?;
        let (phy, data) = unsafe {
            (
                iio_context_find_device(ctx, phy_name.as_ptr()),
                iio_context_find_device(ctx, data_name.as_ptr()),
            )
        };
        debug!("libiio context {} created", uri);
        Ok(IioHandle {
            ctx,
            phy,
            data,
            buffer: Mutex::new(BufferPtr(ptr::null_mut())),
        })
    }

    fn device(&self, dev: DeviceKind) -> Result<*mut IioDevice> {
        let ptr = match dev {
            DeviceKind::Phy => self.phy,
            DeviceKind::Data => self.data,
        };
        if ptr.is_null() {
            return Err(PlutoError::SubdeviceMissing(dev.name().to_string()));
        }
        Ok(ptr)
    }

    fn channel(&self, chan: ChannelId) -> Result<*mut IioChannel> {
        let dev = self.device(chan.device)?;
        let name = cstr(chan.name)?;
        let ptr = unsafe { iio_device_find_channel(dev, name.as_ptr(), chan.output) };
        if ptr.is_null() {
            return Err(PlutoError::ChannelUnavailable(format!(
                "{} {}",
                chan.device.name(),
                chan.name
            )));
        }
        Ok(ptr)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, BufferPtr> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeviceHandle for IioHandle {
    fn has_device(&self, dev: DeviceKind) -> bool {
        self.device(dev).is_ok()
    }

    fn has_channel(&self, chan: ChannelId) -> bool {
        self.channel(chan).is_ok()
    }

    fn write_channel_attr(&self, chan: ChannelId, attr: &str, value: AttrValue) -> Result<()> {
        let chn = self.channel(chan)?;
        let attr = cstr(attr)?;
        let ret = unsafe {
            match value {
                AttrValue::Bool(v) => iio_channel_attr_write_bool(chn, attr.as_ptr(), v),
                AttrValue::Int(v) => iio_channel_attr_write_longlong(chn, attr.as_ptr(), v),
                AttrValue::Float(v) => iio_channel_attr_write_double(chn, attr.as_ptr(), v),
                AttrValue::Text(v) => {
                    let src = cstr(v)?;
                    iio_channel_attr_write(chn, attr.as_ptr(), src.as_ptr()) as c_int
                }
            }
        };
        check(ret)
    }

    fn read_debug_attr(&self, dev: DeviceKind, attr: &str) -> Result<i64> {
        let dev = self.device(dev)?;
        let attr = cstr(attr)?;
        let mut val: c_longlong = 0;
        check(unsafe { iio_device_debug_attr_read_longlong(dev, attr.as_ptr(), &mut val) })?;
        Ok(val)
    }

    fn write_debug_attr(&self, dev: DeviceKind, attr: &str, value: i64) -> Result<()> {
        let dev = self.device(dev)?;
        let attr = cstr(attr)?;
        check(unsafe { iio_device_debug_attr_write_longlong(dev, attr.as_ptr(), value) })
    }

    fn read_reg(&self, dev: DeviceKind, addr: u32) -> Result<u32> {
        let dev = self.device(dev)?;
        let mut val: u32 = 0;
        check(unsafe { iio_device_reg_read(dev, addr, &mut val) })?;
        Ok(val)
    }

    fn write_reg(&self, dev: DeviceKind, addr: u32, value: u32) -> Result<()> {
        let dev = self.device(dev)?;
        check(unsafe { iio_device_reg_write(dev, addr, value) })
    }

    fn set_channel_enabled(&self, chan: ChannelId, enable: bool) -> Result<()> {
        let chn = self.channel(chan)?;
        unsafe {
            if enable {
                iio_channel_enable(chn);
            } else {
                iio_channel_disable(chn);
            }
        }
        Ok(())
    }

    fn set_kernel_buffers_count(&self, count: u32) -> Result<()> {
        let dev = self.device(DeviceKind::Data)?;
        check(unsafe { iio_device_set_kernel_buffers_count(dev, count) })
    }

    fn create_buffer(&self, samples: usize) -> Result<()> {
        let dev = self.device(DeviceKind::Data)?;
        let mut buffer = self.lock_buffer();
        if !buffer.0.is_null() {
            unsafe { iio_buffer_destroy(buffer.0) };
            buffer.0 = ptr::null_mut();
        }
        let buf = unsafe { iio_device_create_buffer(dev, samples, false) };
        if buf.is_null() {
            return Err(io::Error::last_os_error().into());
        }
        buffer.0 = buf;
        Ok(())
    }

    fn refill(&self, dst: &mut [u8]) -> Result<usize> {
        let buffer = self.lock_buffer();
        if buffer.0.is_null() {
            return Err(PlutoError::Acquisition("no data buffer".to_string()));
        }
        let ret = unsafe { iio_buffer_refill(buffer.0) };
        if ret < 0 {
            let errno = (-ret) as i32;
            return Err(match errno {
                ENODEV | EBADF | ENXIO => {
                    PlutoError::ChannelUnavailable(format!("refill: {}", io::Error::from_raw_os_error(errno)))
                }
                _ => io::Error::from_raw_os_error(errno).into(),
            });
        }
        unsafe {
            copy_block(
                iio_buffer_start(buffer.0) as *const u8,
                iio_buffer_end(buffer.0) as *const u8,
                dst,
            )
        }
    }

    fn destroy_buffer(&self) {
        let mut buffer = self.lock_buffer();
        if !buffer.0.is_null() {
            unsafe { iio_buffer_destroy(buffer.0) };
            buffer.0 = ptr::null_mut();
        }
    }
}

impl Drop for IioHandle {
    fn drop(&mut self) {
        self.destroy_buffer();
        unsafe { iio_context_destroy(self.ctx) };
        info!("libiio context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_start_is_transient() {
        let mut dst = [0u8; 8];
        let err = unsafe { copy_block(ptr::null(), ptr::null(), &mut dst) }.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, PlutoError::Acquisition(_)));
    }

    #[test]
    fn test_copy_truncated_to_destination() {
        let src: Vec<u8> = (0..16).collect();
        let range = src.as_ptr_range();
        let mut dst = [0u8; 6];
        let n = unsafe { copy_block(range.start, range.end, &mut dst) }.unwrap();
        assert_eq!(n, 6);
        assert_eq!(dst, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_block_copies_nothing() {
        let src = [7u8; 4];
        let start = src.as_ptr();
        let mut dst = [0u8; 4];
        assert_eq!(unsafe { copy_block(start, start, &mut dst) }.unwrap(), 0);
        assert_eq!(dst, [0u8; 4]);
    }
}
