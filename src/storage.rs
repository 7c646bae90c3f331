//! Fixed-size record persistence for the local buffer.
//!
//! Records live in numbered slots of a [`Storage`] device. A record carries
//! the sequence number it was pushed with and is written to slot
//! `seq % capacity`, so once the store is full the newest record overwrites
//! the oldest, the same FIFO-overwrite policy the RAM buffer applies.
//!
//! Record layout (little-endian, [`RECORD_SIZE`] bytes):
//!
//! ```text
//! 0..2   magic "TR"
//! 2      format version
//! 3      flags (bit0 valid, bit1 temp_low, bit2 temp_high, bit3 humidity_low, bit4 humidity_high)
//! 4..12  sequence number (u64)
//! 12..20 timestamp, ms since boot (u64)
//! 20..28 recorded_at, unix ms (i64)
//! 28..32 temperature (f32)
//! 32..36 humidity (f32)
//! 36     XOR checksum of bytes 0..36
//! 37..40 padding
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::DateTime;
use tracing::{debug, info, warn};

use crate::alert::AlertFlags;
use crate::error::StorageError;
use crate::reading::Reading;

pub const RECORD_SIZE: usize = 40;

/// Erased flash reads back as all ones.
pub const ERASED_BYTE: u8 = 0xFF;

const MAGIC: [u8; 2] = *b"TR";
const FORMAT_VERSION: u8 = 1;
const CHECKSUM_OFFSET: usize = 36;

pub type Record = [u8; RECORD_SIZE];

/// Persistent media exposing fixed-size record slots.
pub trait Storage: Send {
    /// Number of slots on the device.
    fn slots(&self) -> usize;

    fn read(&mut self, slot: usize) -> Result<Record, StorageError>;

    fn write(&mut self, slot: usize, record: &Record) -> Result<(), StorageError>;

    /// Reset a slot to the erased state.
    fn erase(&mut self, slot: usize) -> Result<(), StorageError>;
}

/// A reading recovered from storage together with its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub seq: u64,
    pub reading: Reading,
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

pub fn encode_record(seq: u64, reading: &Reading) -> Record {
    let mut record = [0u8; RECORD_SIZE];
    record[0..2].copy_from_slice(&MAGIC);
    record[2] = FORMAT_VERSION;

    let alerts = &reading.alerts;
    record[3] = (reading.valid as u8)
        | (alerts.temp_low as u8) << 1
        | (alerts.temp_high as u8) << 2
        | (alerts.humidity_low as u8) << 3
        | (alerts.humidity_high as u8) << 4;

    record[4..12].copy_from_slice(&seq.to_le_bytes());
    record[12..20].copy_from_slice(&reading.timestamp_ms.to_le_bytes());
    record[20..28].copy_from_slice(&reading.recorded_at.timestamp_millis().to_le_bytes());
    record[28..32].copy_from_slice(&reading.temperature.to_le_bytes());
    record[32..36].copy_from_slice(&reading.humidity.to_le_bytes());
    record[CHECKSUM_OFFSET] = checksum(&record[..CHECKSUM_OFFSET]);
    record
}

/// Decode a slot. Erased, foreign or corrupted slots decode as `None`.
pub fn decode_record(record: &Record) -> Option<StoredReading> {
    if record[0..2] != MAGIC || record[2] != FORMAT_VERSION {
        return None;
    }
    if record[CHECKSUM_OFFSET] != checksum(&record[..CHECKSUM_OFFSET]) {
        return None;
    }

    let u64_at = |at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&record[at..at + 8]);
        bytes
    };
    let f32_at = |at: usize| {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&record[at..at + 4]);
        f32::from_le_bytes(bytes)
    };

    let flags = record[3];
    let recorded_at = DateTime::from_timestamp_millis(i64::from_le_bytes(u64_at(20)))?;

    Some(StoredReading {
        seq: u64::from_le_bytes(u64_at(4)),
        reading: Reading {
            timestamp_ms: u64::from_le_bytes(u64_at(12)),
            recorded_at,
            temperature: f32_at(28),
            humidity: f32_at(32),
            valid: flags & 0b1 != 0,
            alerts: AlertFlags {
                temp_low: flags & 0b10 != 0,
                temp_high: flags & 0b100 != 0,
                humidity_low: flags & 0b1000 != 0,
                humidity_high: flags & 0b1_0000 != 0,
            },
        },
    })
}

/// Sequence-addressed view over a [`Storage`] device.
pub struct RecordStore {
    storage: Box<dyn Storage>,
    capacity: usize,
}

impl RecordStore {
    /// Use the first `capacity` slots of `storage`.
    pub fn new(storage: Box<dyn Storage>, capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 || storage.slots() < capacity {
            return Err(StorageError::SlotOutOfRange {
                slot: capacity,
                capacity: storage.slots(),
            });
        }
        Ok(Self { storage, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot_for(&self, seq: u64) -> usize {
        (seq % self.capacity as u64) as usize
    }

    /// Read back every surviving record, oldest first.
    ///
    /// Records sitting in a slot that does not match their sequence number
    /// (left over from a different capacity) are ignored.
    pub fn recover(&mut self) -> Result<Vec<StoredReading>, StorageError> {
        let mut recovered = Vec::new();
        for slot in 0..self.capacity {
            let record = self.storage.read(slot)?;
            if let Some(stored) = decode_record(&record) {
                if self.slot_for(stored.seq) == slot {
                    recovered.push(stored);
                } else {
                    debug!(slot = slot, seq = stored.seq, "Ignoring misplaced record");
                }
            }
        }
        recovered.sort_by_key(|stored| stored.seq);

        if !recovered.is_empty() {
            info!(records = recovered.len(), "Recovered buffered readings from storage");
        }
        Ok(recovered)
    }

    pub fn store(&mut self, seq: u64, reading: &Reading) -> Result<(), StorageError> {
        let slot = self.slot_for(seq);
        self.storage.write(slot, &encode_record(seq, reading))
    }

    pub fn remove(&mut self, seq: u64) -> Result<(), StorageError> {
        let slot = self.slot_for(seq);
        self.storage.erase(slot)
    }
}

/// [`Storage`] backed by a pre-sized file, one record per slot.
pub struct FileStorage {
    file: File,
    slots: usize,
}

impl FileStorage {
    /// Open or create the file, extending it with erased slots as needed.
    pub fn open(path: impl AsRef<Path>, slots: usize) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let wanted = (slots * RECORD_SIZE) as u64;
        let current = file.metadata()?.len();
        if current < wanted {
            file.seek(SeekFrom::Start(current))?;
            let padding = vec![ERASED_BYTE; (wanted - current) as usize];
            file.write_all(&padding)?;
            file.sync_data()?;
            debug!(path = %path.display(), slots = slots, "Initialised record file");
        }

        Ok(Self { file, slots })
    }

    fn seek_slot(&mut self, slot: usize) -> Result<(), StorageError> {
        if slot >= self.slots {
            return Err(StorageError::SlotOutOfRange {
                slot,
                capacity: self.slots,
            });
        }
        self.file.seek(SeekFrom::Start((slot * RECORD_SIZE) as u64))?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn slots(&self) -> usize {
        self.slots
    }

    fn read(&mut self, slot: usize) -> Result<Record, StorageError> {
        self.seek_slot(slot)?;
        let mut record = [ERASED_BYTE; RECORD_SIZE];
        self.file.read_exact(&mut record)?;
        Ok(record)
    }

    fn write(&mut self, slot: usize, record: &Record) -> Result<(), StorageError> {
        self.seek_slot(slot)?;
        self.file.write_all(record)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn erase(&mut self, slot: usize) -> Result<(), StorageError> {
        self.seek_slot(slot)?;
        if let Err(e) = self.file.write_all(&[ERASED_BYTE; RECORD_SIZE]) {
            warn!(slot = slot, error = %e, "Failed to erase record slot");
            return Err(e.into());
        }
        self.file.sync_data()?;
        Ok(())
    }
}
