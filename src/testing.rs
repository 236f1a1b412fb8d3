//! In-memory stand-ins for the parts of the node `embedded-hal-mock` does
//! not cover, shared by the unit tests.

use crate::measure::{Gain, LoadCellAmplifier, RawReading, TemperatureProbe, WeighingSystem};
use crate::transport::Responder;
use core::convert::Infallible;
use embedded_storage::{ReadStorage, Storage};
use rand_core::RngCore;

/// Failure injected by a fake.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Fault;

/// Byte-addressed storage, initialised to the erased state.
#[derive(Debug)]
pub struct MemStorage {
    pub bytes: Vec<u8>,
    pub writes: usize,
    pub fail_writes: bool,
}

impl MemStorage {
    pub fn blank() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0xff; capacity],
            writes: 0,
            fail_writes: false,
        }
    }
}

impl ReadStorage for MemStorage {
    type Error = Fault;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let source = self.bytes.get(start..start + bytes.len()).ok_or(Fault)?;
        bytes.copy_from_slice(source);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for MemStorage {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(Fault);
        }
        let start = offset as usize;
        self.bytes
            .get_mut(start..start + bytes.len())
            .ok_or(Fault)?
            .copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

/// Calls made on a [`FakeAmplifier`], readiness checks excluded.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AmpCall {
    PowerUp,
    PowerDown,
    SetGain(Gain),
    Read,
}

/// Amplifier returning a fixed value per gain once its script runs out.
#[derive(Debug)]
pub struct FakeAmplifier {
    pub script: Vec<i32>,
    pub ready: bool,
    pub fail_reads: bool,
    pub calls: Vec<AmpCall>,
    gain32: i32,
    gain64: i32,
    gain: Gain,
}

impl FakeAmplifier {
    pub fn new(gain32: i32, gain64: i32) -> Self {
        Self {
            script: Vec::new(),
            ready: true,
            fail_reads: false,
            calls: Vec::new(),
            gain32,
            gain64,
            gain: Gain::Gain32,
        }
    }
}

impl LoadCellAmplifier for FakeAmplifier {
    type Error = Fault;

    fn power_up(&mut self) -> Result<(), Self::Error> {
        self.calls.push(AmpCall::PowerUp);
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), Self::Error> {
        self.calls.push(AmpCall::PowerDown);
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> Result<(), Self::Error> {
        self.calls.push(AmpCall::SetGain(gain));
        self.gain = gain;
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.ready)
    }

    fn read(&mut self) -> Result<i32, Self::Error> {
        self.calls.push(AmpCall::Read);
        if self.fail_reads {
            return Err(Fault);
        }
        if !self.script.is_empty() {
            return Ok(self.script.remove(0));
        }
        Ok(match self.gain {
            Gain::Gain32 => self.gain32,
            Gain::Gain64 => self.gain64,
        })
    }
}

/// Temperature probe reporting a fixed value.
#[derive(Debug)]
pub struct FakeProbe {
    pub conversions: usize,
    pub channels_read: Vec<u8>,
    celsius: f32,
}

impl FakeProbe {
    pub fn new(celsius: f32) -> Self {
        Self {
            conversions: 0,
            channels_read: Vec::new(),
            celsius,
        }
    }
}

impl TemperatureProbe for FakeProbe {
    type Error = Fault;

    fn request_conversion(&mut self) -> Result<(), Self::Error> {
        self.conversions += 1;
        Ok(())
    }

    fn read_channel(&mut self, index: u8) -> Result<f32, Self::Error> {
        self.channels_read.push(index);
        Ok(self.celsius)
    }
}

/// Weighing system returning canned readings.
#[derive(Debug)]
pub struct FakeScale {
    pub raw: RawReading,
    pub temperature: f32,
    pub fail: bool,
    /// Sample counts of every measurement cycle, in order.
    pub measurements: Vec<u16>,
}

impl FakeScale {
    pub fn new(raw: RawReading) -> Self {
        Self {
            raw,
            temperature: 20.0,
            fail: false,
            measurements: Vec::new(),
        }
    }
}

impl WeighingSystem for FakeScale {
    type Error = Fault;

    fn measure(&mut self, samples: u16) -> Result<RawReading, Self::Error> {
        if self.fail {
            return Err(Fault);
        }
        self.measurements.push(samples);
        Ok(self.raw)
    }

    fn read_temperature(&mut self) -> Result<f32, Self::Error> {
        if self.fail {
            return Err(Fault);
        }
        Ok(self.temperature)
    }
}

/// Responder collecting every line with its hold-off.
#[derive(Debug, Default)]
pub struct Recorder {
    pub sent: Vec<(String, u32)>,
}

impl Recorder {
    pub fn lines(&self) -> Vec<String> {
        self.sent.iter().map(|(line, _)| line.clone()).collect()
    }
}

impl Responder for Recorder {
    type Error = Infallible;

    fn send(&mut self, line: &str, holdoff_ms: u32) -> Result<(), Self::Error> {
        self.sent.push((line.to_string(), holdoff_ms));
        Ok(())
    }
}

/// Counter posing as a random source.
#[derive(Debug)]
pub struct SeqRng {
    next: u32,
}

impl SeqRng {
    pub fn new(start: u32) -> Self {
        Self { next: start }
    }
}

impl RngCore for SeqRng {
    fn next_u32(&mut self) -> u32 {
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        value
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.next_u32() as u8;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
