//! Half-duplex RS-485 transmission.
//!
//! Every node on the bus listens by default. To answer, a node waits out
//! its configured silence, raises the transceiver's transmit-enable line,
//! lets it settle, sends the reply followed by a newline, waits for the
//! UART to drain and releases the line again:
//!
//! ```text
//! holdoff ─┐ TXEN ↑ ─ settle ─ payload "\n" ─ flush ─ TXEN ↓
//! ```
//!
//! The dispatcher never touches pins directly; it talks to a [`Responder`],
//! which [`Transport`] implements for real hardware.

use crate::consts::{
    FRAME_IDLE_TIMEOUT_MS, INTER_BYTE_POLL_MS, POST_FRAME_DELAY_MS, TX_ENABLE_SETTLE_MS,
};
use crate::frame::{Command, FrameReader};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal_nb::serial::{Read, Write};
use nb::block;

/// Sink for reply lines.
pub trait Responder {
    /// Transmission error type.
    type Error;

    /// Sends `line` as one newline-terminated transmission after keeping
    /// the bus quiet for `holdoff_ms`.
    fn send(&mut self, line: &str, holdoff_ms: u32) -> Result<(), Self::Error>;
}

/// Errors raised while transmitting.
#[derive(Debug, thiserror::Error)]
pub enum Error<SerialE, PinE> {
    /// The UART failed.
    #[error("serial error: {0:?}")]
    Serial(SerialE),
    /// The transmit-enable line could not be driven.
    #[error("transmit-enable pin error: {0:?}")]
    TxEnable(PinE),
}

/// Bus timing.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Timing {
    /// Time between raising transmit-enable and the first payload byte.
    pub settle_ms: u32,
    /// Pause between two empty polls while a frame is open.
    pub poll_interval_ms: u32,
    /// Silence after which an open frame is abandoned.
    pub idle_timeout_ms: u32,
    /// Pause after a handled frame before the port is polled again.
    pub post_frame_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: TX_ENABLE_SETTLE_MS,
            poll_interval_ms: INTER_BYTE_POLL_MS,
            idle_timeout_ms: FRAME_IDLE_TIMEOUT_MS,
            post_frame_ms: POST_FRAME_DELAY_MS,
        }
    }
}

/// The node's bus interface: a UART, the transceiver's transmit-enable
/// line and a delay source.
#[derive(Debug)]
pub struct Transport<SERIAL, TXEN, D>
where
    SERIAL: Read<u8> + Write<u8>,
    TXEN: OutputPin,
    D: DelayNs,
{
    /// UART connected to the transceiver.
    pub serial: SERIAL,
    /// Transmit-enable line, high while transmitting.
    pub tx_enable: TXEN,
    delay: D,
    timing: Timing,
}

impl<SERIAL, TXEN, D> Transport<SERIAL, TXEN, D>
where
    SERIAL: Read<u8> + Write<u8>,
    TXEN: OutputPin,
    D: DelayNs,
{
    /// Creates the transport and releases the bus.
    pub fn new(serial: SERIAL, tx_enable: TXEN, delay: D, timing: Timing) -> Self {
        let mut transport = Self {
            serial,
            tx_enable,
            delay,
            timing,
        };
        let _ = transport.tx_enable.set_low();
        transport
    }

    /// The configured timing.
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Builds a frame reader using this transport's inter-byte timing.
    pub fn frame_reader(&self) -> FrameReader {
        FrameReader::new(self.timing.poll_interval_ms, self.timing.idle_timeout_ms)
    }

    /// Reads at most one command from the UART.
    pub fn receive(&mut self, reader: &mut FrameReader) -> Result<Option<Command>, SERIAL::Error> {
        reader.poll(&mut self.serial, &mut self.delay)
    }

    /// Blocks for `ms` milliseconds.
    pub fn pause_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    fn write_payload(&mut self, line: &str) -> Result<(), SERIAL::Error> {
        for byte in line.bytes().chain(core::iter::once(b'\n')) {
            block!(self.serial.write(byte))?;
        }
        block!(self.serial.flush())
    }
}

impl<SERIAL, TXEN, D> Responder for Transport<SERIAL, TXEN, D>
where
    SERIAL: Read<u8> + Write<u8>,
    TXEN: OutputPin,
    D: DelayNs,
{
    type Error = Error<SERIAL::Error, TXEN::Error>;

    fn send(&mut self, line: &str, holdoff_ms: u32) -> Result<(), Self::Error> {
        self.delay.delay_ms(holdoff_ms);
        self.tx_enable.set_high().map_err(Error::TxEnable)?;
        self.delay.delay_ms(self.timing.settle_ms);

        let written = self.write_payload(line);
        // the bus must be released even if the UART failed
        let released = self.tx_enable.set_low();
        written.map_err(Error::Serial)?;
        released.map_err(Error::TxEnable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::{
        CheckedDelay, NoopDelay, Transaction as DelayTransaction,
    };
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::serial::{Mock as SerialMock, Transaction as SerialTransaction};
    use embedded_hal_nb::serial::ErrorKind;

    fn enable_pulse() -> PinMock {
        PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ])
    }

    #[test]
    fn test_new_releases_bus() {
        let tx_enable = PinMock::new(&[PinTransaction::set(PinState::Low)]);
        let transport =
            Transport::new(SerialMock::new(&[]), tx_enable, NoopDelay::new(), Timing::default());
        let Transport {
            mut serial,
            mut tx_enable,
            ..
        } = transport;
        serial.done();
        tx_enable.done();
    }

    #[test]
    fn test_send_wraps_payload_in_enable_pulse() {
        let serial = SerialMock::new(&[
            SerialTransaction::write_many(b"OK\n"),
            SerialTransaction::flush(),
        ]);
        let mut transport =
            Transport::new(serial, enable_pulse(), NoopDelay::new(), Timing::default());

        transport.send("OK", 0).unwrap();
        transport.serial.done();
        transport.tx_enable.done();
    }

    #[test]
    fn test_send_waits_holdoff_then_settle() {
        let serial = SerialMock::new(&[
            SerialTransaction::write_many(b"141\n"),
            SerialTransaction::flush(),
        ]);
        let delay = CheckedDelay::new(&[
            DelayTransaction::delay_ms(25),
            DelayTransaction::delay_ms(50),
        ]);
        let mut transport = Transport::new(serial, enable_pulse(), delay, Timing::default());

        transport.send("141", 25).unwrap();
        transport.serial.done();
        transport.tx_enable.done();
        transport.delay.done();
    }

    #[test]
    fn test_serial_failure_still_releases_bus() {
        let serial = SerialMock::new(&[SerialTransaction::write_error(
            b'O',
            nb::Error::Other(ErrorKind::Other),
        )]);
        let mut transport =
            Transport::new(serial, enable_pulse(), NoopDelay::new(), Timing::default());

        assert!(matches!(
            transport.send("OK", 0),
            Err(Error::Serial(ErrorKind::Other))
        ));
        transport.serial.done();
        transport.tx_enable.done();
    }

    #[test]
    fn test_receive_uses_transport_serial() {
        let tx_enable = PinMock::new(&[PinTransaction::set(PinState::Low)]);
        let serial = SerialMock::new(&[SerialTransaction::read_many(b"<5,GET_T>")]);
        let mut transport = Transport::new(serial, tx_enable, NoopDelay::new(), Timing::default());
        let mut reader = transport.frame_reader();

        let command = transport.receive(&mut reader).unwrap().unwrap();
        assert_eq!(command.target_id, 5);
        transport.serial.done();
        transport.tx_enable.done();
    }
}
