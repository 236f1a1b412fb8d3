//! Constants used across the node's protocol, persistence and measurement code.
//!
//! This module defines the wire markers and size limits of the command frame,
//! the reserved bus addresses, the accepted baud rates, the default timing of
//! the RS-485 transmit handshake and the reply strings the node emits.
//!
//! ## Key Concepts
//!
//! - **Frames**: `<id,CMD[,PARAM]>`, printable ASCII, at most [`MAX_FRAME_LEN`] bytes.
//! - **Addresses**: `0..=254` select a single node, [`BROADCAST_ADDRESS`] reaches every node.
//! - **Timing**: all delays are in milliseconds and match the deployed firmware.
//!
//! These values should be used wherever framing, addressing or reply logic is
//! implemented so every node on a bus speaks the same dialect.

/// Byte that opens a command frame.
pub const FRAME_START: u8 = b'<';

/// Byte that closes a command frame.
pub const FRAME_END: u8 = b'>';

/// Separator between the id, the command keyword and the parameter.
pub const FIELD_SEPARATOR: char = ',';

/// Hard cap on the bytes consumed for one frame, the start marker included.
///
/// Non-printable bytes are dropped from the frame body but still count
/// toward this limit, so line noise cannot keep a frame open forever.
pub const MAX_FRAME_LEN: usize = 128;

/// Reserved id used to discover a node's address without knowing it.
pub const BROADCAST_ADDRESS: i32 = 255;

/// Bus address a node answers to after its first boot.
///
/// Equal to the snow-scale sensor-type code in [`SENSOR_TYPES`].
pub const DEFAULT_ADDRESS: u8 = 141;

/// Baud rates accepted by `SET_BAUD`.
pub const BAUD_RATES: [u32; 5] = [1200, 2400, 4800, 9600, 19200];

/// Baud rate used after the first boot.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Storage reserved for the sensor name, the terminating NUL included.
pub const NAME_CAPACITY: usize = 10;

/// Longest sensor name that fits in [`NAME_CAPACITY`].
pub const NAME_MAX_LEN: usize = NAME_CAPACITY - 1;

/// Sensor name used after the first boot.
pub const DEFAULT_NAME: &str = "DFLT";

/// Sensor-type codes reported by `GET_SENS`.
pub const SENSOR_TYPES: [u8; 1] = [141];

/// Largest sample-average count.
///
/// Deployed units store the count as a signed 16-bit value.
pub const SAMPLE_AVERAGE_MAX: u16 = 32767;

/// Number of logical load-cell channels (two amplifiers, two gain taps each).
pub const CHANNEL_COUNT: usize = 4;

/// How long an amplifier may take to signal a conversion after power-up.
pub const AMPLIFIER_READY_TIMEOUT_MS: u32 = 1000;

/// Interval between two readiness checks while waiting on an amplifier.
pub const AMPLIFIER_READY_POLL_MS: u32 = 1;

/// Exclusive upper bound of the random hold-off before a broadcast reply.
pub const BROADCAST_JITTER_MS: u32 = 1000;

/// Time the transmit-enable line is held before the payload is sent.
pub const TX_ENABLE_SETTLE_MS: u32 = 50;

/// Pause between two polls of the serial port while a frame is open.
pub const INTER_BYTE_POLL_MS: u32 = 1;

/// Silence after which an open frame is abandoned.
pub const FRAME_IDLE_TIMEOUT_MS: u32 = 100;

/// Pause after a frame has been handled, before the port is polled again.
pub const POST_FRAME_DELAY_MS: u32 = 500;

/// Width of the buffer used to format one reply line.
pub const LINE_CAPACITY: usize = 256;

/// Positive acknowledgement.
pub const REPLY_OK: &str = "OK";

/// Reply to a `SET_BAUD` outside [`BAUD_RATES`].
pub const REPLY_ERR_BAUD: &str = "ERR: Baud";

/// Reply to a `SET_ID` outside `0..=254`.
pub const REPLY_ERR_ADDR: &str = "ERR: Addr";

/// Reply when the configuration could not be written.
pub const REPLY_ERR_STORE: &str = "ERR: Store";

/// Reply when an amplifier or the temperature probe failed.
pub const REPLY_ERR_SENSOR: &str = "ERR: Sensor";

/// Progress notice sent before a tare measurement starts.
pub const REPLY_WAIT: &str = "Wait...";

/// First line of the `GET_CONFIG` dump.
pub const CONFIG_BANNER: &str = "\n\nSENSOR CONFIGURATION PARAMETERS\n";
