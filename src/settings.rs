//! Per-device persisted settings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const KEY_SAMPLE_RATE: &str = "samplerate";
pub const KEY_BANDWIDTH: &str = "bandwidth";
pub const KEY_GAIN: &str = "gain";
pub const KEY_GAIN_MODE: &str = "gainMode";
pub const KEY_RF_PORT: &str = "rfselect";
pub const KEY_IQ_MODE: &str = "iqmode";

#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Setting {
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Setting::Int(v) => Some(v),
            Setting::Float(v) if v.is_finite() => Some(v.round() as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Setting::Int(v) => Some(v as f64),
            Setting::Float(v) => Some(v),
            Setting::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Setting::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Storage keyed by device identity. The driver reads a device's values
/// when it is selected and writes each value the user changes.
pub trait SettingsStore: Send {
    fn get(&self, identity: &str, key: &str) -> Option<Setting>;
    fn set(&mut self, identity: &str, key: &str, value: Setting);
    fn selected_device(&self) -> Option<String>;
    fn set_selected_device(&mut self, identity: &str);
}

#[derive(Debug, Default)]
struct Entries {
    values: HashMap<(String, String), Setting>,
    selected: Option<String>,
}

/// In-process store. Clones share the same entries.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Entries>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, identity: &str, key: &str) -> Option<Setting> {
        self.lock()
            .values
            .get(&(identity.to_string(), key.to_string()))
            .cloned()
    }

    fn set(&mut self, identity: &str, key: &str, value: Setting) {
        self.lock()
            .values
            .insert((identity.to_string(), key.to_string()), value);
    }

    fn selected_device(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    fn set_selected_device(&mut self, identity: &str) {
        self.lock().selected = Some(identity.to_string());
    }
}
