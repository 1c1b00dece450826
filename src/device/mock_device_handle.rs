//! Mock version of an opened IIO context
use super::{AttrValue, ChannelId, DeviceHandle, DeviceKind};
use crate::error::Result;
use mockall::mock;

mock! {
    pub Handle {}
    impl DeviceHandle for Handle {
        fn has_device(&self, dev: DeviceKind) -> bool;
        fn has_channel(&self, chan: ChannelId) -> bool;
        fn write_channel_attr(&self, chan: ChannelId, attr: &str, value: AttrValue) -> Result<()>;
        fn read_debug_attr(&self, dev: DeviceKind, attr: &str) -> Result<i64>;
        fn write_debug_attr(&self, dev: DeviceKind, attr: &str, value: i64) -> Result<()>;
        fn read_reg(&self, dev: DeviceKind, addr: u32) -> Result<u32>;
        fn write_reg(&self, dev: DeviceKind, addr: u32, value: u32) -> Result<()>;
        fn set_channel_enabled(&self, chan: ChannelId, enable: bool) -> Result<()>;
        fn set_kernel_buffers_count(&self, count: u32) -> Result<()>;
        fn create_buffer(&self, samples: usize) -> Result<()>;
        fn refill(&self, dst: &mut [u8]) -> Result<usize>;
        fn destroy_buffer(&self);
    }
}

/// A mock that answers every presence check positively and reports the
/// given topology flag, leaving the remaining expectations to the test.
pub fn healthy_handle(mode_flag: i64) -> MockHandle {
    let mut mock = MockHandle::new();
    mock.expect_has_device().return_const(true);
    mock.expect_has_channel().return_const(true);
    mock.expect_read_debug_attr()
        .returning(move |_, _| Ok(mode_flag));
    mock
}
