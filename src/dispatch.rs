//! Command dispatch.
//!
//! [`Dispatcher::dispatch`] decides whether a [`Command`] is meant for this
//! node, maps its keyword to an [`Action`] and carries the action out
//! against the [`ConfigStore`] and the [`WeighingSystem`], replying through
//! a [`Responder`].
//!
//! ## Addressing
//!
//! - A command whose id equals the configured bus address runs its action.
//! - A command sent to [`BROADCAST_ADDRESS`] is answered with the node's
//!   address after a random hold-off of up to [`BROADCAST_JITTER_MS`], so
//!   several nodes discovered at once do not talk over each other.
//! - Anything else is ignored without a reply.
//!
//! ## Parameters
//!
//! Numeric parameters are read with [`parse_int`] and [`parse_float`]:
//! text that is not a number becomes zero and the setting is stored as
//! such. Only `SET_BAUD` and `SET_ID` range-check their value.
//!
//! ## Replies
//!
//! | Situation                         | Reply                |
//! |-----------------------------------|----------------------|
//! | setting stored                    | `OK`                 |
//! | baud rate not accepted            | `ERR: Baud`          |
//! | address out of range              | `ERR: Addr`          |
//! | configuration could not be stored | `ERR: Store`         |
//! | amplifier or probe failed         | `ERR: Sensor`        |
//! | unknown keyword, wrong address    | nothing              |

use crate::config::{ConfigStore, SensorConfig};
use crate::consts::{
    BAUD_RATES, BROADCAST_ADDRESS, BROADCAST_JITTER_MS, CONFIG_BANNER, LINE_CAPACITY,
    REPLY_ERR_ADDR, REPLY_ERR_BAUD, REPLY_ERR_SENSOR, REPLY_ERR_STORE, REPLY_OK, REPLY_WAIT,
    SAMPLE_AVERAGE_MAX, SENSOR_TYPES,
};
use crate::frame::Command;
use crate::measure::WeighingSystem;
use crate::number::{parse_float, parse_int};
use crate::transport::Responder;
use core::fmt::{self, Write as _};
use embedded_storage::Storage;
use heapless::String;
use rand_core::RngCore;

/// Firmware version reported by `GET_CONFIG`.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

type Line = String<LINE_CAPACITY>;

fn line(args: fmt::Arguments<'_>) -> Line {
    let mut line = Line::new();
    let _ = line.write_fmt(args);
    line
}

/// One of the four logical load-cell channels.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Channel {
    /// Amplifier 1, 32× tap.
    A1,
    /// Amplifier 1, 64× tap.
    B1,
    /// Amplifier 2, 32× tap.
    A2,
    /// Amplifier 2, 64× tap.
    B2,
}

impl Channel {
    /// Slot of this channel in a [`RawReading`](crate::measure::RawReading).
    pub fn index(self) -> usize {
        match self {
            Channel::A1 => 0,
            Channel::B1 => 1,
            Channel::A2 => 2,
            Channel::B2 => 3,
        }
    }
}

/// Everything a node can be asked to do.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Action {
    /// `SET_BAUD`: store a baud rate from [`BAUD_RATES`].
    SetBaud,
    /// `SET_ID`: store a bus address in `0..=254`.
    SetId,
    /// `SET_NAME`: store the node name.
    SetName,
    /// `GET_CONFIG`: dump the configuration.
    GetConfig,
    /// `AT`: liveness check.
    At,
    /// `GET_W`: reported mass.
    GetWeight,
    /// `GET_W4X`: calibrated channel values and reported mass.
    GetWeightChannels,
    /// `GET_T`: probe temperature.
    GetTemperature,
    /// `GET_RAW`: raw channel readings.
    GetRaw,
    /// `SET_PROP_xx`: per-channel gain.
    SetChannelGain(Channel),
    /// `SET_OFFSET_xx`: per-channel offset.
    SetChannelOffset(Channel),
    /// `SET_SMPL_AVG`: conversions averaged per reading.
    SetSampleAverage,
    /// `SET_PROP`: instrument gain.
    SetInstrumentGain,
    /// `SET_OFFSET`: instrument offset.
    SetInstrumentOffset,
    /// `TARE_ON`: zero the current load.
    TareOn,
    /// `TARE_OFF`: clear the tare.
    TareOff,
    /// `SET_TXD`: transmit hold-off.
    SetTransmitDelay,
    /// `GET_SENS`: supported sensor-type codes.
    GetSensorTypes,
}

impl Action {
    /// Every action, in protocol-table order.
    pub const ALL: [Action; 24] = [
        Action::SetBaud,
        Action::SetId,
        Action::SetName,
        Action::GetConfig,
        Action::At,
        Action::GetWeight,
        Action::GetWeightChannels,
        Action::GetTemperature,
        Action::GetRaw,
        Action::SetChannelGain(Channel::A1),
        Action::SetChannelGain(Channel::B1),
        Action::SetChannelGain(Channel::A2),
        Action::SetChannelGain(Channel::B2),
        Action::SetChannelOffset(Channel::A1),
        Action::SetChannelOffset(Channel::B1),
        Action::SetChannelOffset(Channel::A2),
        Action::SetChannelOffset(Channel::B2),
        Action::SetSampleAverage,
        Action::SetInstrumentGain,
        Action::SetInstrumentOffset,
        Action::TareOn,
        Action::TareOff,
        Action::SetTransmitDelay,
        Action::GetSensorTypes,
    ];

    /// The wire keyword of this action.
    pub fn keyword(self) -> &'static str {
        match self {
            Action::SetBaud => "SET_BAUD",
            Action::SetId => "SET_ID",
            Action::SetName => "SET_NAME",
            Action::GetConfig => "GET_CONFIG",
            Action::At => "AT",
            Action::GetWeight => "GET_W",
            Action::GetWeightChannels => "GET_W4X",
            Action::GetTemperature => "GET_T",
            Action::GetRaw => "GET_RAW",
            Action::SetChannelGain(Channel::A1) => "SET_PROP_A1",
            Action::SetChannelGain(Channel::B1) => "SET_PROP_B1",
            Action::SetChannelGain(Channel::A2) => "SET_PROP_A2",
            Action::SetChannelGain(Channel::B2) => "SET_PROP_B2",
            Action::SetChannelOffset(Channel::A1) => "SET_OFFSET_A1",
            Action::SetChannelOffset(Channel::B1) => "SET_OFFSET_B1",
            Action::SetChannelOffset(Channel::A2) => "SET_OFFSET_A2",
            Action::SetChannelOffset(Channel::B2) => "SET_OFFSET_B2",
            Action::SetSampleAverage => "SET_SMPL_AVG",
            Action::SetInstrumentGain => "SET_PROP",
            Action::SetInstrumentOffset => "SET_OFFSET",
            Action::TareOn => "TARE_ON",
            Action::TareOff => "TARE_OFF",
            Action::SetTransmitDelay => "SET_TXD",
            Action::GetSensorTypes => "GET_SENS",
        }
    }

    /// Looks up the action for an upper-case keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|action| action.keyword() == keyword)
    }
}

/// What became of a dispatched command.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Outcome {
    /// The action ran and its reply was sent.
    Replied,
    /// A parameter failed validation; an error reply was sent and nothing changed.
    Rejected,
    /// Storage or measurement hardware failed; an error reply was sent.
    Failed,
    /// Addressed to this node but not understood; no reply.
    Ignored,
    /// Addressed to another node; no reply.
    NotAddressed,
    /// Broadcast discovery answered with this node's address.
    Discovered,
}

/// Maps commands to actions.
#[derive(Debug)]
pub struct Dispatcher<R> {
    rng: R,
    hardware: &'static str,
}

impl<R> Dispatcher<R>
where
    R: RngCore,
{
    /// Creates a dispatcher.
    ///
    /// # Arguments
    /// - `rng`: source of the broadcast reply hold-off.
    /// - `hardware`: MCU description reported by `GET_CONFIG`.
    pub fn new(rng: R, hardware: &'static str) -> Self {
        Self { rng, hardware }
    }

    /// Handles one command.
    ///
    /// Only a failing [`Responder`] is reported as an error; storage and
    /// sensor failures are answered on the bus and surface as
    /// [`Outcome::Failed`].
    pub fn dispatch<S, W, T>(
        &mut self,
        command: &Command,
        store: &mut ConfigStore<S>,
        scale: &mut W,
        responder: &mut T,
    ) -> Result<Outcome, T::Error>
    where
        S: Storage,
        W: WeighingSystem,
        T: Responder,
    {
        let config = store.config();
        if command.target_id == i32::from(config.bus_address) {
            match Action::from_keyword(&command.name) {
                Some(action) => {
                    debug!("running {}", action.keyword());
                    self.execute(action, &command.parameter, store, scale, responder)
                }
                None => {
                    debug!("ignoring unknown command {}", command.name.as_str());
                    Ok(Outcome::Ignored)
                }
            }
        } else if command.target_id == BROADCAST_ADDRESS {
            let holdoff = self.rng.next_u32() % BROADCAST_JITTER_MS;
            debug!("broadcast discovery, answering in {} ms", holdoff);
            let address = line(format_args!("{}", config.bus_address));
            responder.send(&address, holdoff + u32::from(config.transmit_delay_ms))?;
            Ok(Outcome::Discovered)
        } else {
            Ok(Outcome::NotAddressed)
        }
    }

    fn execute<S, W, T>(
        &self,
        action: Action,
        parameter: &str,
        store: &mut ConfigStore<S>,
        scale: &mut W,
        responder: &mut T,
    ) -> Result<Outcome, T::Error>
    where
        S: Storage,
        W: WeighingSystem,
        T: Responder,
    {
        match action {
            Action::SetBaud => {
                let baud = u32::try_from(parse_int(parameter))
                    .ok()
                    .filter(|baud| BAUD_RATES.contains(baud));
                match baud {
                    Some(baud) => persist(store, responder, |c| c.baud_rate = baud),
                    None => reject(store.config(), responder, REPLY_ERR_BAUD),
                }
            }
            Action::SetId => {
                let address = u8::try_from(parse_int(parameter))
                    .ok()
                    .filter(|&address| i32::from(address) != BROADCAST_ADDRESS);
                match address {
                    Some(address) => persist(store, responder, |c| c.bus_address = address),
                    None => reject(store.config(), responder, REPLY_ERR_ADDR),
                }
            }
            Action::SetName => persist(store, responder, |c| c.set_name(parameter)),
            Action::GetConfig => {
                let config = store.config();
                reply(config, responder, CONFIG_BANNER)?;
                for field in 1..=12 {
                    reply(config, responder, &self.config_line(field, config))?;
                }
                Ok(Outcome::Replied)
            }
            Action::At => {
                if parameter.is_empty() {
                    reply(store.config(), responder, REPLY_OK)?;
                    Ok(Outcome::Replied)
                } else {
                    Ok(Outcome::Ignored)
                }
            }
            Action::GetWeight => {
                let config = store.config();
                match scale.compute_mass(config) {
                    Ok(mass) => {
                        let text = line(format_args!("{:.2}", config.reported_mass(mass)));
                        reply(config, responder, &text)?;
                        Ok(Outcome::Replied)
                    }
                    Err(_) => sensor_failed(config, responder),
                }
            }
            Action::GetWeightChannels => {
                let config = store.config();
                match scale.measure(config.sample_average_count) {
                    Ok(raw) => {
                        let values = config.channel_values(&raw);
                        let reported = config.reported_mass(values.iter().sum());
                        let text = line(format_args!(
                            "{:.2},{:.2},{:.2},{:.2},{:.2}",
                            values[0], values[1], values[2], values[3], reported
                        ));
                        reply(config, responder, &text)?;
                        Ok(Outcome::Replied)
                    }
                    Err(_) => sensor_failed(config, responder),
                }
            }
            Action::GetTemperature => {
                let config = store.config();
                match scale.read_temperature() {
                    Ok(temperature) => {
                        reply(config, responder, &line(format_args!("{:.2}", temperature)))?;
                        Ok(Outcome::Replied)
                    }
                    Err(_) => sensor_failed(config, responder),
                }
            }
            Action::GetRaw => {
                let config = store.config();
                match scale.measure(config.sample_average_count) {
                    Ok(raw) => {
                        let text =
                            line(format_args!("{},{},{},{}", raw[0], raw[1], raw[2], raw[3]));
                        reply(config, responder, &text)?;
                        Ok(Outcome::Replied)
                    }
                    Err(_) => sensor_failed(config, responder),
                }
            }
            Action::SetChannelGain(channel) => {
                let gain = parse_float(parameter);
                persist(store, responder, |c| c.channel_gain[channel.index()] = gain)
            }
            Action::SetChannelOffset(channel) => {
                let offset = parse_float(parameter);
                persist(store, responder, |c| c.channel_offset[channel.index()] = offset)
            }
            Action::SetSampleAverage => {
                let count =
                    parse_int(parameter).clamp(1, i32::from(SAMPLE_AVERAGE_MAX)) as u16;
                persist(store, responder, |c| c.sample_average_count = count)
            }
            Action::SetInstrumentGain => {
                let gain = parse_float(parameter);
                persist(store, responder, |c| c.instrument_gain = gain)
            }
            Action::SetInstrumentOffset => {
                let offset = parse_float(parameter);
                persist(store, responder, |c| c.instrument_offset = offset)
            }
            Action::TareOn => {
                reply(store.config(), responder, REPLY_WAIT)?;
                match scale.compute_mass(store.config()) {
                    Ok(mass) => {
                        let tare = -(mass * store.config().instrument_gain);
                        debug!("tare set to {}", tare);
                        persist(store, responder, |c| c.tare_offset = tare)
                    }
                    Err(_) => sensor_failed(store.config(), responder),
                }
            }
            Action::TareOff => persist(store, responder, |c| c.tare_offset = 0.0),
            Action::SetTransmitDelay => {
                // saturating: negative and NaN become 0
                let delay = parse_float(parameter) as u16;
                persist(store, responder, |c| c.transmit_delay_ms = delay)
            }
            Action::GetSensorTypes => {
                let mut text = Line::new();
                for (i, code) in SENSOR_TYPES.iter().enumerate() {
                    if i > 0 {
                        let _ = text.push(',');
                    }
                    let _ = write!(text, "{}", code);
                }
                reply(store.config(), responder, &text)?;
                Ok(Outcome::Replied)
            }
        }
    }

    /// Formats line `field` (1-based) of the `GET_CONFIG` dump.
    fn config_line(&self, field: u8, c: &SensorConfig) -> Line {
        let [g0, g1, g2, g3] = c.channel_gain;
        let [o0, o1, o2, o3] = c.channel_offset;
        match field {
            1 => line(format_args!("1,RS-485 ID  ,{}", c.bus_address)),
            2 => line(format_args!("2,S. name    ,{}", c.sensor_name)),
            3 => line(format_args!("3,Com Baud   ,{}", c.baud_rate)),
            4 => line(format_args!("4,Tx delay   ,{}", c.transmit_delay_ms)),
            5 => line(format_args!("5,Hardware   ,{}", self.hardware)),
            6 => line(format_args!("6,Firmware   ,{}", FIRMWARE_VERSION)),
            7 => line(format_args!("7,Instr.Prop ,{:.4}", c.instrument_gain)),
            8 => line(format_args!("8,Instr.Ofst ,{:.4}", c.instrument_offset)),
            9 => line(format_args!("9,Tare       ,{:.2}", c.tare_offset)),
            10 => line(format_args!("10,Sample AVG,{}", c.sample_average_count)),
            11 => line(format_args!("11,Cel. Prop ,{:.9},{:.9},{:.9},{:.9}", g0, g1, g2, g3)),
            _ => line(format_args!("12,Cel. Ofset,{:.9},{:.9},{:.9},{:.9}", o0, o1, o2, o3)),
        }
    }
}

/// Sends `text` after the configured transmit hold-off.
fn reply<T: Responder>(
    config: &SensorConfig,
    responder: &mut T,
    text: &str,
) -> Result<(), T::Error> {
    responder.send(text, u32::from(config.transmit_delay_ms))
}

fn reject<T: Responder>(
    config: &SensorConfig,
    responder: &mut T,
    text: &str,
) -> Result<Outcome, T::Error> {
    debug!("rejecting parameter: {}", text);
    reply(config, responder, text)?;
    Ok(Outcome::Rejected)
}

fn sensor_failed<T: Responder>(
    config: &SensorConfig,
    responder: &mut T,
) -> Result<Outcome, T::Error> {
    warn!("measurement failed");
    reply(config, responder, REPLY_ERR_SENSOR)?;
    Ok(Outcome::Failed)
}

/// Applies `edit`, persists it and acknowledges.
fn persist<S, T, F>(
    store: &mut ConfigStore<S>,
    responder: &mut T,
    edit: F,
) -> Result<Outcome, T::Error>
where
    S: Storage,
    T: Responder,
    F: FnOnce(&mut SensorConfig),
{
    match store.update(edit) {
        Ok(()) => {
            reply(store.config(), responder, REPLY_OK)?;
            Ok(Outcome::Replied)
        }
        Err(_) => {
            reply(store.config(), responder, REPLY_ERR_STORE)?;
            Ok(Outcome::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDecoder;
    use crate::testing::{FakeScale, MemStorage, Recorder, SeqRng};
    use std::string::String as StdString;

    struct Bench {
        dispatcher: Dispatcher<SeqRng>,
        store: ConfigStore<MemStorage>,
        scale: FakeScale,
        out: Recorder,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                dispatcher: Dispatcher::new(SeqRng::new(1234), "ATmega328p"),
                store: ConfigStore::load(MemStorage::blank()).unwrap(),
                scale: FakeScale::new([100, 200, 300, 400]),
                out: Recorder::default(),
            }
        }

        fn run(&mut self, frame: &str) -> Outcome {
            let mut decoder = FrameDecoder::new();
            let command = frame
                .bytes()
                .find_map(|b| decoder.push(b))
                .expect("frame not closed")
                .expect("frame rejected");
            self.dispatcher
                .dispatch(&command, &mut self.store, &mut self.scale, &mut self.out)
                .unwrap()
        }

        /// Runs `frame` and returns the reply lines it produced.
        fn ask(&mut self, frame: &str) -> Vec<StdString> {
            self.out.sent.clear();
            let _ = self.run(frame);
            self.out.lines()
        }

        fn config(&self) -> SensorConfig {
            self.store.config().clone()
        }

        fn writes(&self) -> usize {
            self.store.storage().writes
        }
    }

    fn number(reply: &str) -> f32 {
        reply.parse().unwrap()
    }

    #[test]
    fn test_action_table_round_trips_keywords() {
        for action in Action::ALL {
            assert_eq!(Action::from_keyword(action.keyword()), Some(action));
        }
        assert_eq!(Action::from_keyword("get_w"), None);
        assert_eq!(Action::from_keyword("GET_X"), None);
    }

    #[test]
    fn test_default_config_dump() {
        let mut bench = Bench::new();
        let lines = bench.ask("<141,GET_CONFIG>");
        let expected = [
            CONFIG_BANNER.to_string(),
            "1,RS-485 ID  ,141".to_string(),
            "2,S. name    ,DFLT".to_string(),
            "3,Com Baud   ,9600".to_string(),
            "4,Tx delay   ,0".to_string(),
            "5,Hardware   ,ATmega328p".to_string(),
            format!("6,Firmware   ,{}", FIRMWARE_VERSION),
            "7,Instr.Prop ,1.0000".to_string(),
            "8,Instr.Ofst ,0.0000".to_string(),
            "9,Tare       ,0.00".to_string(),
            "10,Sample AVG,1".to_string(),
            "11,Cel. Prop ,1.000000000,1.000000000,1.000000000,1.000000000".to_string(),
            "12,Cel. Ofset,0.000000000,0.000000000,0.000000000,0.000000000".to_string(),
        ];
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_set_baud_accepts_supported_rates() {
        let mut bench = Bench::new();
        for baud in BAUD_RATES {
            let lines = bench.ask(&format!("<141,SET_BAUD,{}>", baud));
            assert_eq!(lines, ["OK"]);
            assert_eq!(bench.config().baud_rate, baud);
            let dump = bench.ask("<141,GET_CONFIG>");
            assert_eq!(dump[3], format!("3,Com Baud   ,{}", baud));
        }
    }

    #[test]
    fn test_set_baud_rejects_other_values() {
        let mut bench = Bench::new();
        let before = bench.config();
        let writes = bench.writes();
        for parameter in ["9601", "0", "-9600", "abc", "", "115200"] {
            let frame = format!("<141,SET_BAUD,{}>", parameter);
            assert_eq!(bench.run(&frame), Outcome::Rejected);
            assert_eq!(bench.out.lines().last().unwrap(), "ERR: Baud");
        }
        assert_eq!(bench.config(), before);
        assert_eq!(bench.writes(), writes);
    }

    #[test]
    fn test_set_id_accepts_unicast_range() {
        let mut bench = Bench::new();
        for address in [0u8, 77, 254] {
            let current = bench.config().bus_address;
            let lines = bench.ask(&format!("<{},SET_ID,{}>", current, address));
            assert_eq!(lines, ["OK"]);
            assert_eq!(bench.config().bus_address, address);
        }
    }

    #[test]
    fn test_set_id_rejects_broadcast_and_out_of_range() {
        let mut bench = Bench::new();
        for parameter in ["255", "-1", "300", "1000"] {
            let frame = format!("<141,SET_ID,{}>", parameter);
            assert_eq!(bench.run(&frame), Outcome::Rejected);
            assert_eq!(bench.out.lines().last().unwrap(), "ERR: Addr");
        }
        assert_eq!(bench.config().bus_address, 141);
    }

    #[test]
    fn test_node_follows_its_new_address() {
        let mut bench = Bench::new();
        assert_eq!(bench.run("<141,SET_ID,12>"), Outcome::Replied);
        assert_eq!(bench.run("<141,AT>"), Outcome::NotAddressed);
        assert_eq!(bench.ask("<12,AT>"), ["OK"]);
    }

    #[test]
    fn test_set_name_truncates() {
        let mut bench = Bench::new();
        assert_eq!(bench.ask("<141,SET_NAME,Weighbridge-North>"), ["OK"]);
        assert_eq!(bench.config().sensor_name.as_str(), "Weighbrid");
    }

    #[test]
    fn test_setters_change_only_their_field() {
        let cases: [(&str, fn(&mut SensorConfig)); 12] = [
            ("<141,SET_PROP_A1,0.5>", |c| c.channel_gain[0] = 0.5),
            ("<141,SET_PROP_B1,1.25>", |c| c.channel_gain[1] = 1.25),
            ("<141,SET_PROP_A2,-2>", |c| c.channel_gain[2] = -2.0),
            ("<141,SET_PROP_B2,0.001>", |c| c.channel_gain[3] = 0.001),
            ("<141,SET_OFFSET_A1,10>", |c| c.channel_offset[0] = 10.0),
            ("<141,SET_OFFSET_B1,-3.5>", |c| c.channel_offset[1] = -3.5),
            ("<141,SET_OFFSET_A2,7.75>", |c| c.channel_offset[2] = 7.75),
            ("<141,SET_OFFSET_B2,0.5>", |c| c.channel_offset[3] = 0.5),
            ("<141,SET_PROP,0.98>", |c| c.instrument_gain = 0.98),
            ("<141,SET_OFFSET,-1.5>", |c| c.instrument_offset = -1.5),
            ("<141,SET_SMPL_AVG,16>", |c| c.sample_average_count = 16),
            ("<141,SET_TXD,40>", |c| c.transmit_delay_ms = 40),
        ];
        for (frame, edit) in cases {
            let mut bench = Bench::new();
            let mut expected = bench.config();
            edit(&mut expected);

            assert_eq!(bench.ask(frame), ["OK"], "{}", frame);
            assert_eq!(bench.config(), expected, "{}", frame);
            let reloaded = ConfigStore::load(bench.store.release()).unwrap();
            assert_eq!(reloaded.config(), &expected, "{}", frame);
        }
    }

    #[test]
    fn test_malformed_numbers_store_zero() {
        let mut bench = Bench::new();
        assert_eq!(bench.ask("<141,SET_PROP_A1,abc>"), ["OK"]);
        assert_eq!(bench.config().channel_gain[0], 0.0);
        assert_eq!(bench.ask("<141,SET_PROP>"), ["OK"]);
        assert_eq!(bench.config().instrument_gain, 0.0);
    }

    #[test]
    fn test_sample_average_and_delay_are_clamped() {
        let mut bench = Bench::new();
        let _ = bench.ask("<141,SET_SMPL_AVG,0>");
        assert_eq!(bench.config().sample_average_count, 1);
        let _ = bench.ask("<141,SET_SMPL_AVG,x>");
        assert_eq!(bench.config().sample_average_count, 1);
        let _ = bench.ask("<141,SET_SMPL_AVG,40000>");
        assert_eq!(bench.config().sample_average_count, 32767);
        let _ = bench.ask("<141,SET_TXD,12.7>");
        assert_eq!(bench.config().transmit_delay_ms, 12);
        let _ = bench.ask("<141,SET_TXD,-5>");
        assert_eq!(bench.config().transmit_delay_ms, 0);
    }

    #[test]
    fn test_replies_wait_for_transmit_delay() {
        let mut bench = Bench::new();
        let _ = bench.ask("<141,SET_TXD,30>");
        assert_eq!(bench.out.sent[0].1, 30);
        let _ = bench.ask("<141,AT>");
        assert_eq!(bench.out.sent[0].1, 30);
    }

    #[test]
    fn test_at_answers_ok_without_parameter() {
        let mut bench = Bench::new();
        assert_eq!(bench.ask("<141,AT>"), ["OK"]);
        assert!(bench.ask("<141,AT,x>").is_empty());

        bench.out.sent.clear();
        assert_eq!(bench.run("<141,AT,x>"), Outcome::Ignored);
        assert!(bench.out.sent.is_empty());
    }

    #[test]
    fn test_sensor_types() {
        let mut bench = Bench::new();
        assert_eq!(bench.ask("<141,GET_SENS>"), ["141"]);
    }

    #[test]
    fn test_silence_for_unknown_commands_and_other_nodes() {
        let mut bench = Bench::new();
        assert_eq!(bench.run("<141,REBOOT>"), Outcome::Ignored);
        assert_eq!(bench.run("<140,AT>"), Outcome::NotAddressed);
        assert_eq!(bench.run("<0,GET_W>"), Outcome::NotAddressed);
        assert!(bench.out.sent.is_empty());
        assert_eq!(bench.scale.measurements, Vec::<u16>::new());
    }

    #[test]
    fn test_broadcast_answers_after_jitter() {
        let mut bench = Bench::new();
        let _ = bench.ask("<141,SET_TXD,5>");
        bench.out.sent.clear();

        assert_eq!(bench.run("<255,AT>"), Outcome::Discovered);
        assert_eq!(bench.out.sent.len(), 1);
        let (text, holdoff) = &bench.out.sent[0];
        assert_eq!(text, "141");
        assert_eq!(*holdoff, 1234 % 1000 + 5);
    }

    #[test]
    fn test_broadcast_jitter_stays_below_a_second() {
        let mut bench = Bench::new();
        bench.dispatcher = Dispatcher::new(SeqRng::new(u32::MAX - 3), "x");
        for _ in 0..8 {
            let _ = bench.run("<255,GET_SENS>");
        }
        assert!(bench.out.sent.iter().all(|(_, holdoff)| *holdoff < 1000));
    }

    #[test]
    fn test_get_weight_reports_calibrated_mass() {
        let mut bench = Bench::new();
        assert_eq!(bench.ask("<141,GET_W>"), ["1000.00"]);

        let _ = bench.ask("<141,SET_PROP_B2,0.5>");
        let _ = bench.ask("<141,SET_OFFSET_A1,2>");
        let _ = bench.ask("<141,SET_PROP,2>");
        let _ = bench.ask("<141,SET_OFFSET,1>");
        // (100 + 2 + 200 + 300 + 200) * 2 + 1
        assert_eq!(bench.ask("<141,GET_W>"), ["1605.00"]);
    }

    #[test]
    fn test_get_weight_uses_sample_average_count() {
        let mut bench = Bench::new();
        let _ = bench.ask("<141,SET_SMPL_AVG,8>");
        let _ = bench.ask("<141,GET_W>");
        let _ = bench.ask("<141,GET_RAW>");
        assert_eq!(bench.scale.measurements, [8, 8]);
    }

    #[test]
    fn test_get_weight_channels() {
        let mut bench = Bench::new();
        let _ = bench.ask("<141,SET_PROP_A2,0.5>");
        let _ = bench.ask("<141,SET_OFFSET,-50>");
        assert_eq!(
            bench.ask("<141,GET_W4X>"),
            ["100.00,200.00,150.00,400.00,800.00"]
        );
        assert_eq!(bench.scale.measurements.len(), 1);
    }

    #[test]
    fn test_get_raw_and_temperature() {
        let mut bench = Bench::new();
        bench.scale.raw = [12, -34, 0, 0];
        bench.scale.temperature = 21.5;
        assert_eq!(bench.ask("<141,GET_RAW>"), ["12,-34,0,0"]);
        assert_eq!(bench.ask("<141,GET_T>"), ["21.50"]);
    }

    #[test]
    fn test_tare_cancels_current_load() {
        let mut bench = Bench::new();
        let _ = bench.ask("<141,SET_PROP,2>");
        let _ = bench.ask("<141,SET_OFFSET,5>");

        assert_eq!(bench.ask("<141,TARE_ON>"), ["Wait...", "OK"]);
        assert_eq!(bench.config().tare_offset, -2000.0);
        let first = number(&bench.ask("<141,GET_W>")[0]);
        assert!((first - 5.0).abs() < 0.01);

        let _ = bench.ask("<141,TARE_ON>");
        let second = number(&bench.ask("<141,GET_W>")[0]);
        assert!((second - first).abs() < 0.01);

        assert_eq!(bench.ask("<141,TARE_OFF>"), ["OK"]);
        assert_eq!(bench.config().tare_offset, 0.0);
        assert_eq!(bench.ask("<141,GET_W>"), ["2005.00"]);
    }

    #[test]
    fn test_sensor_failure_is_reported() {
        let mut bench = Bench::new();
        bench.scale.fail = true;
        for frame in ["<141,GET_W>", "<141,GET_W4X>", "<141,GET_RAW>", "<141,GET_T>"] {
            assert_eq!(bench.run(frame), Outcome::Failed);
            assert_eq!(bench.out.lines().last().unwrap(), "ERR: Sensor");
        }
        assert_eq!(bench.ask("<141,TARE_ON>"), ["Wait...", "ERR: Sensor"]);
        assert_eq!(bench.config().tare_offset, 0.0);
    }

    #[test]
    fn test_store_failure_keeps_config() {
        let mut bench = Bench::new();
        bench.store.storage_mut().fail_writes = true;

        assert_eq!(bench.run("<141,SET_PROP_A1,3>"), Outcome::Failed);
        assert_eq!(bench.out.lines(), ["ERR: Store"]);
        assert_eq!(bench.config().channel_gain[0], 1.0);
    }
}
