//! # scalenode
//!
//! A portable, no_std firmware core for RS-485 weighing-station sensor nodes.
//!
//! A node sits on a shared half-duplex bus next to up to 254 others and
//! only talks when spoken to. It reads two dual-channel strain-gauge
//! amplifiers (four logical load-cell channels) and a temperature probe,
//! applies a persisted calibration and answers framed text commands:
//!
//! ```text
//! master → <141,SET_PROP_A1,0.0125>
//! node   ← OK
//! master → <141,GET_W>
//! node   ← 1834.27
//! ```
//!
//! This crate implements:
//! - `embedded-hal` traits for the transceiver's transmit-enable line, the
//!   status indicator and timing
//! - `embedded-hal-nb` serial traits for the UART
//! - `embedded-storage` for the persisted configuration record, byte
//!   compatible with deployed units
//! - narrow amplifier and probe traits, so existing HX711 and DS18B20
//!   drivers plug in without this crate depending on them
//!
//! ## Crate features
//! | Feature     | Description |
//! |-------------|-------------|
//! | `std`       | Disables `#![no_std]` support |
//! | `defmt-0-3` | Uses `defmt` logging and derives `defmt::Format` on public types |
//! | `log`       | Uses `log` logging |
//!
//! ## Modules
//!
//! - [`frame`]: byte-at-a-time `<id,COMMAND[,parameter]>` decoder
//! - [`dispatch`]: addressing, command table and replies
//! - [`config`] and [`encoding`]: the persisted configuration record
//! - [`measure`]: the four-channel measurement pipeline and calibration
//! - [`transport`]: half-duplex transmission with transmit-enable handling
//! - [`node`]: the main loop tying it all together
//!
//! ## Usage
//!
//! ```ignore
//! use scalenode::config::ConfigStore;
//! use scalenode::dispatch::Dispatcher;
//! use scalenode::measure::Scale;
//! use scalenode::node::SensorNode;
//! use scalenode::transport::{Timing, Transport};
//!
//! let store = ConfigStore::load(eeprom)?;
//! let serial = uart(store.config().baud_rate);
//! let transport = Transport::new(serial, tx_enable, delay, Timing::default());
//! let mut scale = Scale::new([amp1, amp2], probe, status_led, scale_delay);
//! let _ = scale.init();
//!
//! SensorNode::new(transport, store, scale, Dispatcher::new(rng, "ATmega328p")).run()
//! ```
//!
//! ## Integration Notes
//!
//! - Everything runs in one thread of control; no interrupt handlers are
//!   involved
//! - Measurements block for up to a second per amplifier while it settles
//! - A changed baud rate takes effect on the next boot
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

#[macro_use]
mod fmt;

pub use heapless;

pub mod config;
pub mod consts;
pub mod dispatch;
pub mod encoding;
pub mod frame;
pub mod measure;
pub mod node;
pub mod number;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
