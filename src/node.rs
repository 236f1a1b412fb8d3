//! The sensor node's main loop.
//!
//! [`SensorNode`] ties the pieces together: it polls the [`Transport`] for
//! a frame, hands the command to the [`Dispatcher`] and, once a frame has
//! closed, keeps the port quiet for [`Timing::post_frame_ms`] before
//! listening again.
//!
//! ## Bring-up
//!
//! The baud rate is part of the persisted configuration, so the
//! configuration has to be loaded before the UART is configured:
//!
//! ```ignore
//! let store = ConfigStore::load(eeprom)?;
//! let serial = board.uart(store.config().baud_rate);
//! let transport = Transport::new(serial, tx_enable, delay, Timing::default());
//! let mut scale = Scale::new([hx711_1, hx711_2], ds18b20, status_led, scale_delay);
//! let _ = scale.init();
//! let dispatcher = Dispatcher::new(rng, "ATmega328p");
//!
//! SensorNode::new(transport, store, scale, dispatcher).run()
//! ```
//!
//! A baud rate changed with `SET_BAUD` is stored right away but only takes
//! effect on the next boot.

use crate::config::{ConfigStore, SensorConfig};
use crate::dispatch::{Dispatcher, Outcome};
use crate::frame::{FrameReader, FrameState};
use crate::measure::WeighingSystem;
use crate::transport::{Error, Timing, Transport};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal_nb::serial::{Read, Write};
use embedded_storage::Storage;
use rand_core::RngCore;

/// A complete weighing-station node.
#[derive(Debug)]
pub struct SensorNode<SERIAL, TXEN, D, S, W, R>
where
    SERIAL: Read<u8> + Write<u8>,
    TXEN: OutputPin,
    D: DelayNs,
    S: Storage,
    W: WeighingSystem,
    R: RngCore,
{
    transport: Transport<SERIAL, TXEN, D>,
    reader: FrameReader,
    store: ConfigStore<S>,
    scale: W,
    dispatcher: Dispatcher<R>,
}

impl<SERIAL, TXEN, D, S, W, R> SensorNode<SERIAL, TXEN, D, S, W, R>
where
    SERIAL: Read<u8> + Write<u8>,
    TXEN: OutputPin,
    D: DelayNs,
    S: Storage,
    W: WeighingSystem,
    R: RngCore,
{
    /// Assembles a node from its parts.
    pub fn new(
        transport: Transport<SERIAL, TXEN, D>,
        store: ConfigStore<S>,
        scale: W,
        dispatcher: Dispatcher<R>,
    ) -> Self {
        let reader = transport.frame_reader();
        info!(
            "node {} listening, transmit delay {} ms",
            store.config().bus_address,
            store.config().transmit_delay_ms
        );
        Self {
            transport,
            reader,
            store,
            scale,
            dispatcher,
        }
    }

    /// The live configuration.
    pub fn config(&self) -> &SensorConfig {
        self.store.config()
    }

    /// The bus timing in use.
    pub fn timing(&self) -> Timing {
        self.transport.timing()
    }

    /// Handles at most one frame.
    ///
    /// Returns `Ok(None)` when no complete, well-formed frame was waiting.
    /// Every frame that reached its end marker or the byte cap is followed
    /// by the post-frame pause, rejected frames and failed replies included.
    pub fn poll(&mut self) -> Result<Option<Outcome>, Error<SERIAL::Error, TXEN::Error>> {
        let command = match self.transport.receive(&mut self.reader) {
            Ok(Some(command)) => command,
            Ok(None) => {
                if self.reader.state() == FrameState::Invalid {
                    self.pause_after_frame();
                    self.reader.reset();
                }
                return Ok(None);
            }
            Err(e) => return Err(Error::Serial(e)),
        };
        trace!(
            "frame for {}: {} {}",
            command.target_id,
            command.name.as_str(),
            command.parameter.as_str()
        );

        let outcome = self.dispatcher.dispatch(
            &command,
            &mut self.store,
            &mut self.scale,
            &mut self.transport,
        );
        self.pause_after_frame();
        Ok(Some(outcome?))
    }

    /// Polls forever. Bus errors drop the frame at hand and are logged.
    pub fn run(&mut self) -> ! {
        loop {
            if self.poll().is_err() {
                warn!("bus error, frame dropped");
            }
        }
    }

    fn pause_after_frame(&mut self) {
        let pause = self.transport.timing().post_frame_ms;
        self.transport.pause_ms(pause);
    }

    /// Takes the node apart again.
    pub fn release(self) -> (Transport<SERIAL, TXEN, D>, ConfigStore<S>, W, Dispatcher<R>) {
        (self.transport, self.store, self.scale, self.dispatcher)
    }
}
