//! Persisted node configuration.
//!
//! [`SensorConfig`] is the single configuration record of a node: its bus
//! identity, serial settings and calibration. [`ConfigStore`] owns the
//! in-memory copy together with the storage it is mirrored to, and is the
//! only way to change it: every edit goes through
//! [`ConfigStore::update`], which writes the whole record before the new
//! values become visible.
//!
//! ## First boot
//!
//! Blank storage decodes with the default flag set. [`ConfigStore::load`]
//! then replaces every field with the factory defaults, clears the flag and
//! writes the record once, so the flag is only ever observed set on the
//! very first boot. If that write fails the node still runs on the
//! defaults; the next successful edit persists them along with it.

use crate::consts::{
    CHANNEL_COUNT, DEFAULT_ADDRESS, DEFAULT_BAUD_RATE, DEFAULT_NAME, NAME_MAX_LEN,
};
use crate::encoding::{RECORD_LEN, RECORD_OFFSET, decode_record, encode_record};
use embedded_storage::Storage;
use heapless::String;

/// Errors raised while loading or persisting the configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    /// The storage primitive reported an error.
    #[error("storage error: {0:?}")]
    Storage(E),
    /// The storage is smaller than one configuration record.
    #[error("storage of {0} bytes cannot hold the configuration record")]
    TooSmall(usize),
}

/// The node's persisted configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// Set only on blank storage, before the factory defaults were written.
    pub is_default: bool,
    /// Address this node answers to (`0..=254`).
    pub bus_address: u8,
    /// Serial baud rate applied at boot.
    pub baud_rate: u32,
    /// Per-channel calibration gain, indexed like [`crate::measure::RawReading`].
    pub channel_gain: [f32; CHANNEL_COUNT],
    /// Per-channel calibration offset.
    pub channel_offset: [f32; CHANNEL_COUNT],
    /// Free-form node name.
    pub sensor_name: String<NAME_MAX_LEN>,
    /// Conversions averaged into each raw reading (at least 1).
    pub sample_average_count: u16,
    /// Additive correction applied last; set by tare.
    pub tare_offset: f32,
    /// Gain applied to the combined mass.
    pub instrument_gain: f32,
    /// Offset applied to the combined mass.
    pub instrument_offset: f32,
    /// Bus silence observed before every transmission.
    pub transmit_delay_ms: u16,
}

impl Default for SensorConfig {
    /// The factory configuration written on first boot.
    fn default() -> Self {
        let mut sensor_name = String::new();
        let _ = sensor_name.push_str(DEFAULT_NAME);
        Self {
            is_default: false,
            bus_address: DEFAULT_ADDRESS,
            baud_rate: DEFAULT_BAUD_RATE,
            channel_gain: [1.0; CHANNEL_COUNT],
            channel_offset: [0.0; CHANNEL_COUNT],
            sensor_name,
            sample_average_count: 1,
            tare_offset: 0.0,
            instrument_gain: 1.0,
            instrument_offset: 0.0,
            transmit_delay_ms: 0,
        }
    }
}

impl SensorConfig {
    /// Replaces the name, keeping at most the first nine characters.
    pub fn set_name(&mut self, name: &str) {
        self.sensor_name.clear();
        for c in name.chars() {
            if self.sensor_name.push(c).is_err() {
                break;
            }
        }
    }
}

/// Owns the configuration record and the storage it is persisted to.
#[derive(Debug)]
pub struct ConfigStore<S> {
    storage: S,
    config: SensorConfig,
}

impl<S> ConfigStore<S>
where
    S: Storage,
{
    /// Reads the record from `storage`, writing the factory defaults first
    /// if the storage has never been initialised.
    ///
    /// Only an unreadable or undersized storage is an error. A failed write
    /// of the defaults is logged and the defaults stay in effect.
    pub fn load(mut storage: S) -> Result<Self, Error<S::Error>> {
        let capacity = storage.capacity();
        if capacity < RECORD_OFFSET as usize + RECORD_LEN {
            return Err(Error::TooSmall(capacity));
        }

        let mut record = [0u8; RECORD_LEN];
        storage
            .read(RECORD_OFFSET, &mut record)
            .map_err(Error::Storage)?;
        let config = decode_record(&record);

        let mut store = Self { storage, config };
        if store.config.is_default {
            info!("blank configuration, writing factory defaults");
            store.config = SensorConfig::default();
            if store.save().is_err() {
                warn!("factory defaults not persisted, running on defaults in memory");
            }
        } else {
            info!(
                "configuration loaded, address {} at {} baud",
                store.config.bus_address,
                store.config.baud_rate
            );
        }
        Ok(store)
    }

    /// The current configuration.
    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Applies `edit` to a copy of the configuration and persists it.
    ///
    /// The in-memory record only changes once the write succeeded, so a
    /// failed write leaves both copies as they were.
    pub fn update<F>(&mut self, edit: F) -> Result<(), Error<S::Error>>
    where
        F: FnOnce(&mut SensorConfig),
    {
        let mut next = self.config.clone();
        edit(&mut next);
        next.is_default = false;
        persist(&mut self.storage, &next)?;
        self.config = next;
        Ok(())
    }

    /// Writes the whole record to storage.
    pub fn save(&mut self) -> Result<(), Error<S::Error>> {
        persist(&mut self.storage, &self.config)
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the underlying storage.
    ///
    /// Writing through it bypasses the in-memory copy; call
    /// [`load`](Self::load) again afterwards to pick such changes up.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Gives the storage back, dropping the in-memory copy.
    pub fn release(self) -> S {
        self.storage
    }
}

fn persist<S: Storage>(storage: &mut S, config: &SensorConfig) -> Result<(), Error<S::Error>> {
    let record = encode_record(config);
    storage.write(RECORD_OFFSET, &record).map_err(|e| {
        warn!("configuration write failed");
        Error::Storage(e)
    })
}
