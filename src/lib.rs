//! # pluto-sdr-rs
//! Real-time receive driver for AD9361 based boards (ADALM-PLUTO and
//! derivatives). [`PlutoSdr`] configures the radio, runs the acquisition
//! thread and publishes normalized complex samples to a [`StreamReader`].

mod acquisition;
pub mod convert;
mod device;
pub mod discovery;
pub mod error;
mod handoff;
pub mod settings;
mod status;
pub mod stream_config;


use acquisition::{EngineShared, Session};
use device::{ChannelSet, Device};
use handoff::{StreamControl, StreamWriter};
use log::{error, info, warn};
use settings::{
    KEY_BANDWIDTH, KEY_GAIN, KEY_GAIN_MODE, KEY_IQ_MODE, KEY_RF_PORT, KEY_SAMPLE_RATE,
};
use std::sync::Arc;
use std::thread::JoinHandle;

pub use acquisition::{AcquisitionState, BufferPlan};
pub use device::{AttrValue, Backend, ChannelId, DeviceHandle, DeviceKind};
#[cfg(feature = "libiio")]
pub use device::libiio::LibIio;
pub use discovery::{DeviceInfo, DeviceScanner, UsbScanner};
pub use error::{PlutoError, Result};
pub use handoff::{StreamReader, STREAM_BUFFER_SIZE};
pub use settings::{MemoryStore, Setting, SettingsStore};
pub use status::HardwareStatus;
pub use stream_config::{GainMode, IqMode, RfPort, StreamConfig};

/// How a configuration change took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Written to the running hardware.
    Live,
    /// Stored; used by the next `start()`.
    Staged,
}

struct Active {
    session: Session,
    worker: JoinHandle<StreamWriter>,
}

pub struct PlutoSdr {
    backend: Box<dyn Backend>,
    store: Box<dyn SettingsStore>,
    devices: Vec<DeviceInfo>,
    selected: Option<DeviceInfo>,
    config: StreamConfig,
    max_transfer: usize,
    shared: Arc<EngineShared>,
    stream: StreamControl,
    writer: Option<StreamWriter>,
    active: Option<Active>,
}

impl PlutoSdr {
    pub fn new<B, S>(backend: B, store: S) -> (PlutoSdr, StreamReader)
    where
        B: Backend + 'static,
        S: SettingsStore + 'static,
    {
        PlutoSdr::with_capacity(backend, store, STREAM_BUFFER_SIZE)
    }

    /// Like [`PlutoSdr::new`] with a custom maximum block size in samples.
    pub fn with_capacity<B, S>(backend: B, store: S, capacity: usize) -> (PlutoSdr, StreamReader)
    where
        B: Backend + 'static,
        S: SettingsStore + 'static,
    {
        let (writer, reader) = handoff::channel(capacity);
        let sdr = PlutoSdr {
            backend: Box::new(backend),
            store: Box::new(store),
            devices: Vec::new(),
            selected: None,
            config: StreamConfig::default(),
            max_transfer: capacity,
            shared: Arc::new(EngineShared::default()),
            stream: writer.control(),
            writer: Some(writer),
            active: None,
        };
        (sdr, reader)
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn selected_device(&self) -> Option<&DeviceInfo> {
        self.selected.as_ref()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Rescan and reselect the current (or last persisted) device. The
    /// selection is left alone while streaming.
    pub fn refresh(&mut self, scanner: &dyn DeviceScanner) -> Result<()> {
        self.reap();
        self.devices = scanner.scan()?;
        if self.active.is_some() {
            return Ok(());
        }
        let identity = match &self.selected {
            Some(dev) => dev.identity.clone(),
            None => self.store.selected_device().unwrap_or_default(),
        };
        self.select_device(&identity);
        Ok(())
    }

    /// Select a device and load its stored settings. Unknown identities
    /// fall back to the first device in the list.
    pub fn select_device(&mut self, identity: &str) {
        self.reap();
        if self.active.is_some() {
            warn!("Cannot change device while streaming");
            return;
        }
        let Some(first) = self.devices.first() else {
            self.selected = None;
            return;
        };
        let dev = self
            .devices
            .iter()
            .find(|d| d.identity == identity)
            .unwrap_or(first)
            .clone();

        self.config = load_config(&*self.store, &dev.identity, self.config.frequency());
        self.store.set_selected_device(&dev.identity);
        info!("Selected {} ({})", dev.identity, dev.uri);
        self.selected = Some(dev);
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |a| !a.worker.is_finished())
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.state()
    }

    /// Latest underflow/overdrive flags, at most one cycle old.
    pub fn status(&self) -> HardwareStatus {
        self.shared.status()
    }

    /// Samples per published block for the running session, or for the
    /// next one when idle.
    pub fn block_size(&self) -> usize {
        match &self.active {
            Some(active) => active.session.plan.block_size,
            None => BufferPlan::new(self.config.sample_rate(), self.max_transfer).block_size,
        }
    }

    /// Open the selected device and start streaming. Without a selected
    /// device this does nothing.
    pub fn start(&mut self) -> Result<()> {
        self.reap();
        if self.active.is_some() {
            return Ok(());
        }
        let Some(dev) = self.selected.clone() else {
            warn!("No device selected, not starting");
            return Ok(());
        };
        if self.stream.reader_gone() {
            return Err(PlutoError::ConsumerTornDown(
                "stream reader was dropped".to_string(),
            ));
        }

        self.shared.set_state(AcquisitionState::Configuring);
        let session =
            match acquisition::configure(&*self.backend, &dev.uri, &self.config, self.max_transfer) {
                Ok(session) => session,
                Err(e) => {
                    error!("Could not start {}: {}", dev.identity, e);
                    self.shared.set_state(AcquisitionState::Idle);
                    return Err(e);
                }
            };

        self.shared.rearm();
        self.stream.begin_session();
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.stream.writer(),
        };
        self.shared.set_state(AcquisitionState::Streaming);
        match acquisition::spawn(session.clone(), writer, self.shared.clone()) {
            Ok(worker) => {
                info!("PlutoSDR '{}': Start!", dev.identity);
                self.active = Some(Active { session, worker });
                Ok(())
            }
            Err(e) => {
                acquisition::drain(&session);
                self.shared.set_state(AcquisitionState::Idle);
                Err(PlutoError::Acquisition(format!(
                    "could not spawn acquisition thread: {}",
                    e
                )))
            }
        }
    }

    /// Stop streaming and release the device. Does nothing when idle.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.shared.request_stop();
        self.stream.stop_writer();
        match active.worker.join() {
            Ok(writer) => self.writer = Some(writer),
            Err(_) => {
                error!("Acquisition thread panicked");
                acquisition::drain(&active.session);
                self.stream.end_session();
            }
        }
        self.shared.set_state(AcquisitionState::Idle);

        match Arc::try_unwrap(active.session.device) {
            Ok(device) => device.close(),
            Err(_) => warn!("Device still referenced after stop"),
        }
        info!("Stop!");
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> Result<Applied> {
        self.reap();
        self.config.set_sample_rate(rate);
        let rate = self.config.sample_rate();
        self.persist(KEY_SAMPLE_RATE, Setting::Int(rate as i64));
        Ok(Applied::Staged)
    }

    pub fn set_bandwidth(&mut self, bw: u32) -> Result<Applied> {
        self.reap();
        let mut next = self.config.clone();
        next.set_bandwidth(bw);
        let applied = self.write_live("bandwidth", |device, chans| {
            stream_config::set_bandwidth(device, chans, &next)
        })?;
        self.config = next;
        let bw = self.config.bandwidth();
        self.persist(KEY_BANDWIDTH, Setting::Int(bw as i64));
        Ok(applied)
    }

    /// Gain in dB; -1 leaves the gain to the front-end. Automatic gain is
    /// never written to the hardware, so it is always reported as staged.
    pub fn set_gain(&mut self, gain: f32) -> Result<Applied> {
        self.reap();
        let gain = stream_config::clamp_gain(gain);
        let applied = if gain <= stream_config::AUTO_GAIN {
            Applied::Staged
        } else {
            self.write_live("gain", |device, chans| {
                stream_config::apply_gain(device, chans, gain)
            })?
        };
        self.config.set_gain(gain);
        self.persist(KEY_GAIN, Setting::Float(gain as f64));
        Ok(applied)
    }

    pub fn set_gain_mode(&mut self, mode: GainMode) -> Result<Applied> {
        self.reap();
        let applied = self.write_live("gain mode", |device, chans| {
            stream_config::apply_gain_mode(device, chans, mode)
        })?;
        self.config.set_gain_mode(mode);
        self.persist(KEY_GAIN_MODE, Setting::Text(mode.key().to_string()));
        Ok(applied)
    }

    /// Retune the RX LO. The frequency belongs to the host and is not
    /// persisted.
    pub fn retune(&mut self, freq: f64) -> Result<Applied> {
        self.reap();
        let applied = self.write_live("frequency", |device, chans| {
            stream_config::retune(device, chans, freq)
        })?;
        if applied == Applied::Live {
            info!("Tuned to {}", stream_config::format_hz(freq));
        }
        self.config.set_frequency(freq);
        Ok(applied)
    }

    pub fn set_rf_port(&mut self, port: RfPort) -> Result<Applied> {
        self.reap();
        self.config.set_rf_port(port);
        self.persist(KEY_RF_PORT, Setting::Text(port.key().to_string()));
        Ok(Applied::Staged)
    }

    pub fn set_iq_mode(&mut self, mode: IqMode) -> Result<Applied> {
        self.reap();
        self.config.set_iq_mode(mode);
        self.persist(KEY_IQ_MODE, Setting::Text(mode.key().to_string()));
        Ok(Applied::Staged)
    }

    fn write_live<F>(&self, what: &str, write: F) -> Result<Applied>
    where
        F: FnOnce(&Device, &ChannelSet) -> Result<()>,
    {
        let Some(active) = &self.active else {
            return Ok(Applied::Staged);
        };
        match write(&active.session.device, &active.session.chans) {
            Ok(()) => Ok(Applied::Live),
            Err(e) => {
                warn!("Could not set {}: {}", what, e);
                Err(e)
            }
        }
    }

    fn persist(&mut self, key: &str, value: Setting) {
        if let Some(dev) = &self.selected {
            self.store.set(&dev.identity, key, value);
        }
    }

    /// Join an acquisition thread that ended on its own.
    fn reap(&mut self) {
        if self
            .active
            .as_ref()
            .map_or(false, |a| a.worker.is_finished())
        {
            info!("Acquisition thread exited, releasing device");
            self.stop();
        }
    }
}

impl Drop for PlutoSdr {
    fn drop(&mut self) {
        self.stop();
    }
}

fn load_config(store: &dyn SettingsStore, identity: &str, frequency: f64) -> StreamConfig {
    let mut config = StreamConfig::default();
    config.set_frequency(frequency);
    let get = |key: &str| store.get(identity, key);

    if let Some(rate) = get(KEY_SAMPLE_RATE).and_then(|s| s.as_int()) {
        config.set_sample_rate(u32::try_from(rate).unwrap_or(0));
    }
    if let Some(bw) = get(KEY_BANDWIDTH).and_then(|s| s.as_int()) {
        config.set_bandwidth(u32::try_from(bw).unwrap_or(u32::MAX));
    }
    if let Some(gain) = get(KEY_GAIN).and_then(|s| s.as_float()) {
        config.set_gain(gain as f32);
    }
    if let Some(Setting::Text(mode)) = get(KEY_GAIN_MODE) {
        config.set_gain_mode(GainMode::from_key(&mode));
    }
    if let Some(Setting::Text(port)) = get(KEY_RF_PORT) {
        config.set_rf_port(RfPort::from_key(&port));
    }
    if let Some(Setting::Text(mode)) = get(KEY_IQ_MODE) {
        config.set_iq_mode(IqMode::from_key(&mode));
    }
    config
}
