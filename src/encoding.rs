//! Fixed binary layout of the persisted configuration record.
//!
//! Deployed nodes keep their configuration as one packed, little-endian
//! record at the start of non-volatile storage. This module converts a
//! [`SensorConfig`] to and from that record so a node can be reflashed
//! without losing its calibration.
//!
//! ## Layout
//!
//! | Offset | Size | Field                  |
//! |--------|------|------------------------|
//! |      0 |    1 | default flag           |
//! |      1 |    1 | bus address            |
//! |      2 |    2 | baud rate              |
//! |      4 |   16 | channel gains (4×f32)  |
//! |     20 |   16 | channel offsets (4×f32)|
//! |     36 |   10 | name, NUL terminated   |
//! |     46 |    2 | sample average count   |
//! |     48 |    4 | tare offset            |
//! |     52 |    4 | instrument gain        |
//! |     56 |    4 | instrument offset      |
//! |     60 |    2 | transmit delay (ms)    |
//!
//! ## Limitations
//!
//! - Erased storage reads as `0xFF`, which decodes with the default flag set.
//! - Baud rate, sample count and transmit delay are 16 bits wide on the wire.
//! - The sample count is signed on the wire. Zero, negative and oversized
//!   counts from older firmware decode into `1..=SAMPLE_AVERAGE_MAX`.

use crate::config::SensorConfig;
use crate::consts::{CHANNEL_COUNT, NAME_CAPACITY, NAME_MAX_LEN, SAMPLE_AVERAGE_MAX};

/// Size of the encoded record in bytes.
pub const RECORD_LEN: usize = 62;

/// Storage offset of the record.
pub const RECORD_OFFSET: u32 = 0;

const DEFAULT_FLAG: usize = 0;
const BUS_ADDRESS: usize = 1;
const BAUD_RATE: usize = 2;
const CHANNEL_GAIN: usize = 4;
const CHANNEL_OFFSET: usize = CHANNEL_GAIN + 4 * CHANNEL_COUNT;
const SENSOR_NAME: usize = CHANNEL_OFFSET + 4 * CHANNEL_COUNT;
const SAMPLE_AVERAGE: usize = SENSOR_NAME + NAME_CAPACITY;
const TARE_OFFSET: usize = SAMPLE_AVERAGE + 2;
const INSTRUMENT_GAIN: usize = TARE_OFFSET + 4;
const INSTRUMENT_OFFSET: usize = INSTRUMENT_GAIN + 4;
const TRANSMIT_DELAY: usize = INSTRUMENT_OFFSET + 4;

/// Encodes `config` into its persisted form.
pub fn encode_record(config: &SensorConfig) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[DEFAULT_FLAG] = u8::from(config.is_default);
    record[BUS_ADDRESS] = config.bus_address;
    put_u16(&mut record, BAUD_RATE, config.baud_rate.min(u32::from(u16::MAX)) as u16);
    for (i, gain) in config.channel_gain.iter().enumerate() {
        put_f32(&mut record, CHANNEL_GAIN + 4 * i, *gain);
    }
    for (i, offset) in config.channel_offset.iter().enumerate() {
        put_f32(&mut record, CHANNEL_OFFSET + 4 * i, *offset);
    }
    let name = config.sensor_name.as_bytes();
    let len = name.len().min(NAME_MAX_LEN);
    record[SENSOR_NAME..SENSOR_NAME + len].copy_from_slice(&name[..len]);
    put_u16(
        &mut record,
        SAMPLE_AVERAGE,
        config.sample_average_count.clamp(1, SAMPLE_AVERAGE_MAX),
    );
    put_f32(&mut record, TARE_OFFSET, config.tare_offset);
    put_f32(&mut record, INSTRUMENT_GAIN, config.instrument_gain);
    put_f32(&mut record, INSTRUMENT_OFFSET, config.instrument_offset);
    put_u16(&mut record, TRANSMIT_DELAY, config.transmit_delay_ms);
    record
}

/// Decodes a persisted record.
///
/// Any non-zero default flag counts as set. The name stops at the first
/// NUL byte; non-printable bytes inside it are skipped.
pub fn decode_record(record: &[u8; RECORD_LEN]) -> SensorConfig {
    let mut config = SensorConfig {
        is_default: record[DEFAULT_FLAG] != 0,
        bus_address: record[BUS_ADDRESS],
        baud_rate: u32::from(get_u16(record, BAUD_RATE)),
        sample_average_count: decode_sample_average(get_u16(record, SAMPLE_AVERAGE)),
        tare_offset: get_f32(record, TARE_OFFSET),
        instrument_gain: get_f32(record, INSTRUMENT_GAIN),
        instrument_offset: get_f32(record, INSTRUMENT_OFFSET),
        transmit_delay_ms: get_u16(record, TRANSMIT_DELAY),
        ..SensorConfig::default()
    };
    for i in 0..CHANNEL_COUNT {
        config.channel_gain[i] = get_f32(record, CHANNEL_GAIN + 4 * i);
        config.channel_offset[i] = get_f32(record, CHANNEL_OFFSET + 4 * i);
    }

    config.sensor_name.clear();
    record[SENSOR_NAME..SENSOR_NAME + NAME_MAX_LEN]
        .iter()
        .take_while(|&&b| b != 0)
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .for_each(|&b| {
            let _ = config.sensor_name.push(char::from(b));
        });
    config
}

fn decode_sample_average(raw: u16) -> u16 {
    let signed = i16::from_le_bytes(raw.to_le_bytes());
    signed.max(1).unsigned_abs()
}

fn put_u16(record: &mut [u8; RECORD_LEN], at: usize, value: u16) {
    record[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(record: &mut [u8; RECORD_LEN], at: usize, value: f32) {
    record[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(record: &[u8; RECORD_LEN], at: usize) -> u16 {
    u16::from_le_bytes([record[at], record[at + 1]])
}

fn get_f32(record: &[u8; RECORD_LEN], at: usize) -> f32 {
    f32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]])
}
