//! The receive engine: session configuration, the refill/monitor/convert/
//! publish loop on its own thread, and the drain that releases DMA buffers.

use crate::convert::convert;
use crate::device::topology::Topology;
use crate::device::{Backend, ChannelSet, Device, DeviceKind, REG_DECIMATION};
use crate::error::{PlutoError, Result};
use crate::handoff::StreamWriter;
use crate::status::{self, HardwareStatus, StatusCell};
use crate::stream_config::{self, IqMode, RfPort, StreamConfig};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Refills per second of stream time (50 ms blocks).
pub const CYCLES_PER_SECOND: u32 = 20;
pub const MAX_KERNEL_BUFFERS: usize = 8;
/// Samples the kernel may hold across all queued DMA blocks.
pub const DMA_BUDGET_SAMPLES: usize = 32_000_000;
/// While refills keep failing, only every this many skipped cycles is logged.
const SKIP_LOG_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Configuring,
    Streaming,
    Draining,
}

impl AcquisitionState {
    fn from_u8(v: u8) -> AcquisitionState {
        match v {
            1 => AcquisitionState::Configuring,
            2 => AcquisitionState::Streaming,
            3 => AcquisitionState::Draining,
            _ => AcquisitionState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlan {
    /// Complex samples per refill and per published block.
    pub block_size: usize,
    pub kernel_buffers: u32,
}

impl BufferPlan {
    pub fn new(sample_rate: u32, max_transfer: usize) -> BufferPlan {
        let per_cycle = (sample_rate / CYCLES_PER_SECOND) as usize;
        let block_size = per_cycle
            .max(1)
            .min(max_transfer)
            .min(DMA_BUDGET_SAMPLES)
            .max(1);
        let kernel_buffers = (DMA_BUDGET_SAMPLES / block_size).clamp(1, MAX_KERNEL_BUFFERS);
        BufferPlan {
            block_size,
            kernel_buffers: kernel_buffers as u32,
        }
    }
}

/// State shared between the control path and the acquisition thread.
#[derive(Debug, Default)]
pub struct EngineShared {
    stop: AtomicBool,
    state: AtomicU8,
    status: StatusCell,
}

impl EngineShared {
    pub fn state(&self) -> AcquisitionState {
        AcquisitionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: AcquisitionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn status(&self) -> HardwareStatus {
        self.status.load()
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Fresh flags for a new streaming session.
    pub(crate) fn rearm(&self) {
        self.stop.store(false, Ordering::Release);
        self.status.reset();
    }
}

/// Everything one streaming session needs, produced by [`configure`].
#[derive(Clone)]
pub struct Session {
    pub device: Arc<Device>,
    pub chans: ChannelSet,
    pub plan: BufferPlan,
    pub iq_mode: IqMode,
}

/// Open the context, push the configuration and allocate the DMA buffer.
/// Any failure drops the context before returning.
pub fn configure(
    backend: &dyn Backend,
    uri: &str,
    config: &StreamConfig,
    max_transfer: usize,
) -> Result<Session> {
    let device = Device::open(backend, uri)?;
    let chans = device.select_rx_channel(config.rf_port())?;
    stream_config::apply_all(&device, &chans, config)?;

    let plan = BufferPlan::new(config.sample_rate(), max_transfer);
    let iq_mode = config.iq_mode();
    device.set_channels_enabled(&[
        (chans.data_i, true),
        (chans.data_q, iq_mode == IqMode::Wide),
    ])?;

    info!("Allocate {} kernel buffers", plan.kernel_buffers);
    info!("Allocate buffer size {}", plan.block_size);
    device.create_buffer(plan.kernel_buffers, plan.block_size)?;

    if let Err(e) = status::reset_underflow(&device) {
        device.destroy_buffer();
        return Err(e);
    }
    match device.read_reg(DeviceKind::Data, REG_DECIMATION) {
        Ok(val) => info!("Decimation register {:#x}", val),
        Err(e) => warn!("Could not read decimation register: {}", e),
    }

    Ok(Session {
        device: Arc::new(device),
        chans,
        plan,
        iq_mode,
    })
}

/// Run the streaming loop on a dedicated thread. The writer comes back
/// through the join handle once the session has drained.
pub fn spawn(
    session: Session,
    mut writer: StreamWriter,
    shared: Arc<EngineShared>,
) -> std::io::Result<JoinHandle<StreamWriter>> {
    thread::Builder::new()
        .name("pluto-rx".to_string())
        .spawn(move || {
            let reason = stream(&session, &mut writer, &shared);
            info!("Acquisition loop exited: {}", reason);
            shared.set_state(AcquisitionState::Draining);
            drain(&session);
            shared.set_state(AcquisitionState::Idle);
            writer.finish();
            writer
        })
}

/// Why the streaming loop returned.
#[derive(Debug)]
pub enum ExitReason {
    Stopped,
    ConsumerTornDown,
    Fatal(PlutoError),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ExitReason::Stopped => write!(f, "stop requested"),
            ExitReason::ConsumerTornDown => write!(f, "consumer torn down"),
            ExitReason::Fatal(e) => write!(f, "{}", e),
        }
    }
}

/// One cycle per DMA block until a stop is observed, the consumer goes away
/// or the channel becomes unusable.
pub fn stream(session: &Session, writer: &mut StreamWriter, shared: &EngineShared) -> ExitReason {
    let device = &*session.device;
    let block_size = session.plan.block_size;
    let mut raw = vec![0u8; block_size * session.iq_mode.bytes_per_sample()];
    let mut skips = SkipLog::default();

    loop {
        if shared.stop_requested() {
            return ExitReason::Stopped;
        }

        match device.refill(&mut raw) {
            Ok(n) if n < raw.len() => {
                if skips.skip() {
                    warn!(
                        "Short refill ({} of {} bytes), {} block(s) skipped",
                        n,
                        raw.len(),
                        skips.run()
                    );
                }
                continue;
            }
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                error!("Refill failed: {}", e);
                return ExitReason::Fatal(e);
            }
            Err(e) => {
                if skips.skip() {
                    warn!("Refill failed, {} block(s) skipped: {}", skips.run(), e);
                }
                continue;
            }
        }
        let skipped = skips.recovered();
        if skipped > 0 {
            info!("Refill recovered after {} skipped block(s)", skipped);
        }

        shared.status.store(poll_status(device, session.chans.port, session.chans.topology));

        let count = convert(&raw, session.iq_mode, writer.write_slot(block_size));
        if !writer.swap(count) {
            if shared.stop_requested() {
                return ExitReason::Stopped;
            }
            return ExitReason::ConsumerTornDown;
        }
    }
}

/// Run length of consecutive skipped cycles. The first skip of a run is
/// reported, then every `SKIP_LOG_INTERVAL`th.
#[derive(Debug, Default)]
struct SkipLog {
    run: u64,
}

impl SkipLog {
    /// Count one skipped cycle; true when it should be logged.
    fn skip(&mut self) -> bool {
        self.run += 1;
        self.run == 1 || self.run % SKIP_LOG_INTERVAL == 0
    }

    fn run(&self) -> u64 {
        self.run
    }

    /// End the run, returning its length.
    fn recovered(&mut self) -> u64 {
        std::mem::take(&mut self.run)
    }
}

fn poll_status(device: &Device, port: RfPort, topology: Topology) -> HardwareStatus {
    let underflow = status::poll_underflow(device).unwrap_or_else(|e| {
        warn!("Underflow poll failed: {}", e);
        false
    });
    if underflow {
        warn!("Underflow!");
    }
    let overdrive = status::poll_overdrive(device, port, topology).unwrap_or_else(|e| {
        warn!("Overdrive poll failed: {}", e);
        false
    });
    if overdrive {
        warn!("Overdrive!");
    }
    HardwareStatus {
        underflow,
        overdrive,
    }
}

/// Disable the data channels and release the DMA buffer.
pub fn drain(session: &Session) {
    let chans = &session.chans;
    if let Err(e) = session
        .device
        .set_channels_enabled(&[(chans.data_i, false), (chans.data_q, false)])
    {
        warn!("Could not disable RX channels: {}", e);
    }
    session.device.destroy_buffer();
}
