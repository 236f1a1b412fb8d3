//! Command framing for the RS-485 text protocol.
//!
//! Bus masters address a node with frames of the form
//!
//! ```text
//! <id,COMMAND>
//! <id,COMMAND,parameter>
//! ```
//!
//! [`FrameDecoder`] is a byte-at-a-time state machine that finds the start
//! marker, accumulates the printable body and validates it into a
//! [`Command`]. [`FrameReader`] drives a decoder from a non-blocking serial
//! port and bounds how long an open frame may stall.
//!
//! ## Noise handling
//!
//! - Bytes before `<` are discarded.
//! - Non-printable bytes inside a frame are dropped but still count toward
//!   [`MAX_FRAME_LEN`], so a runaway stream closes the frame as invalid.
//! - Only the text up to the first `>` is used; anything after it (a
//!   trailing `\r`, say) is skipped while looking for the next `<`.

use crate::consts::{
    FIELD_SEPARATOR, FRAME_END, FRAME_IDLE_TIMEOUT_MS, FRAME_START, INTER_BYTE_POLL_MS,
    MAX_FRAME_LEN,
};
use crate::number::parse_int;
use embedded_hal::delay::DelayNs;
use embedded_hal_nb::serial::Read;
use heapless::{String, Vec};

/// One validated command, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Address the frame was sent to.
    pub target_id: i32,
    /// Command keyword, upper-cased.
    pub name: String<MAX_FRAME_LEN>,
    /// Parameter text as sent, empty when absent.
    pub parameter: String<MAX_FRAME_LEN>,
}

/// Reasons a frame was rejected.
#[derive(PartialEq, Eq, Clone, Copy, Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum FrameError {
    /// The byte cap was reached before the end marker.
    #[error("frame exceeded the byte cap without an end marker")]
    Overflow,
    /// The body has no comma after the id.
    #[error("frame body has no separator after the id")]
    MissingSeparator,
}

/// Decoder state.
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum FrameState {
    /// Discarding bytes until a start marker shows up.
    #[default]
    AwaitingStart,
    /// Inside a frame, collecting its body.
    Accumulating,
    /// The last byte closed a valid frame.
    FrameComplete,
    /// The last byte closed a frame that was rejected.
    Invalid,
}

/// Byte-at-a-time frame decoder.
///
/// [`FrameComplete`](FrameState::FrameComplete) and
/// [`Invalid`](FrameState::Invalid) only last until the next byte, which is
/// handled as if the decoder were awaiting a start marker.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: FrameState,
    body: Vec<u8, MAX_FRAME_LEN>,
    consumed: usize,
}

impl FrameDecoder {
    /// Creates a decoder awaiting a start marker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.state = FrameState::AwaitingStart;
        self.body.clear();
        self.consumed = 0;
    }

    /// Feeds one byte.
    ///
    /// Returns `Some` when the byte closed a frame, with the parsed command
    /// or the reason the frame was dropped.
    pub fn push(&mut self, byte: u8) -> Option<Result<Command, FrameError>> {
        match self.state {
            FrameState::AwaitingStart | FrameState::FrameComplete | FrameState::Invalid => {
                if byte == FRAME_START {
                    self.body.clear();
                    self.consumed = 1;
                    self.state = FrameState::Accumulating;
                } else {
                    self.state = FrameState::AwaitingStart;
                }
                None
            }
            FrameState::Accumulating => {
                self.consumed += 1;
                if byte == FRAME_END {
                    let result = parse_body(&self.body);
                    self.state = if result.is_ok() {
                        FrameState::FrameComplete
                    } else {
                        FrameState::Invalid
                    };
                    return Some(result);
                }
                if (0x20..=0x7e).contains(&byte) {
                    let _ = self.body.push(byte);
                } else {
                    trace!("dropping non-printable byte {}", byte);
                }
                if self.consumed >= MAX_FRAME_LEN {
                    self.state = FrameState::Invalid;
                    return Some(Err(FrameError::Overflow));
                }
                None
            }
        }
    }
}

/// Splits a frame body into id, keyword and parameter.
fn parse_body(body: &[u8]) -> Result<Command, FrameError> {
    // the body only ever holds printable ASCII
    let text = core::str::from_utf8(body).unwrap_or("");
    let (id, rest) = text
        .split_once(FIELD_SEPARATOR)
        .ok_or(FrameError::MissingSeparator)?;
    let (keyword, parameter) = rest.split_once(FIELD_SEPARATOR).unwrap_or((rest, ""));

    let mut command = Command {
        target_id: parse_int(id),
        name: String::new(),
        parameter: String::new(),
    };
    for c in keyword.chars() {
        let _ = command.name.push(c.to_ascii_uppercase());
    }
    let _ = command.parameter.push_str(parameter);
    Ok(command)
}

/// Reads frames from a non-blocking serial port.
///
/// A poll returns immediately when no byte is waiting. Once a start marker
/// has been seen the reader keeps polling, pausing `poll_interval_ms`
/// between empty reads, until the frame closes or the line has been silent
/// for `idle_timeout_ms`.
#[derive(Debug)]
pub struct FrameReader {
    decoder: FrameDecoder,
    poll_interval_ms: u32,
    idle_timeout_ms: u32,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(INTER_BYTE_POLL_MS, FRAME_IDLE_TIMEOUT_MS)
    }
}

impl FrameReader {
    /// Creates a reader with explicit inter-byte timing.
    pub fn new(poll_interval_ms: u32, idle_timeout_ms: u32) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            poll_interval_ms: poll_interval_ms.max(1),
            idle_timeout_ms,
        }
    }

    /// State of the underlying decoder.
    pub fn state(&self) -> FrameState {
        self.decoder.state()
    }

    /// Drops any partial or just-rejected frame.
    pub fn reset(&mut self) {
        self.decoder.reset();
    }

    /// Reads at most one command from `serial`.
    ///
    /// Returns `Ok(None)` when no byte is waiting, when the waiting bytes
    /// hold no start marker, when the frame was rejected, or when the line
    /// went silent mid-frame. A serial error drops the partial frame.
    pub fn poll<SERIAL, D>(
        &mut self,
        serial: &mut SERIAL,
        delay: &mut D,
    ) -> Result<Option<Command>, SERIAL::Error>
    where
        SERIAL: Read<u8>,
        D: DelayNs,
    {
        let mut idle_ms = 0;
        loop {
            let byte = match serial.read() {
                Ok(byte) => byte,
                Err(nb::Error::WouldBlock) => {
                    if self.decoder.state() != FrameState::Accumulating {
                        return Ok(None);
                    }
                    if idle_ms >= self.idle_timeout_ms {
                        debug!("frame stalled after {} ms, dropping it", idle_ms);
                        self.decoder.reset();
                        return Ok(None);
                    }
                    delay.delay_ms(self.poll_interval_ms);
                    idle_ms += self.poll_interval_ms;
                    continue;
                }
                Err(nb::Error::Other(e)) => {
                    self.decoder.reset();
                    return Err(e);
                }
            };
            idle_ms = 0;

            match self.decoder.push(byte) {
                None => {}
                Some(Ok(command)) => return Ok(Some(command)),
                Some(Err(e)) => {
                    debug!("dropping frame: {}", e);
                    return Ok(None);
                }
            }
        }
    }
}
