//! Load-cell and temperature measurement pipeline.
//!
//! A node carries two dual-channel strain-gauge amplifiers (HX711 class)
//! and one temperature probe. Each amplifier is read at two gain taps,
//! 32× and 64×, giving four logical channels:
//!
//! | Slot | Amplifier | Gain | Keyword suffix |
//! |------|-----------|------|----------------|
//! |    0 |         1 |  32× | `A1`           |
//! |    1 |         1 |  64× | `B1`           |
//! |    2 |         2 |  32× | `A2`           |
//! |    3 |         2 |  64× | `B2`           |
//!
//! The bit-banged amplifier protocol and the one-wire probe protocol live
//! in external drivers; this module only talks to them through the narrow
//! [`LoadCellAmplifier`] and [`TemperatureProbe`] traits.
//!
//! ## Timing
//!
//! An amplifier may need close to a second to settle after power-up. The
//! pipeline polls its readiness every millisecond for up to
//! [`AMPLIFIER_READY_TIMEOUT_MS`]; when that budget runs out both slots of
//! that amplifier read zero for the cycle. No error is raised for a
//! timeout, so a pair of zeros in a raw reading may mean "not connected"
//! rather than "no load".

use crate::config::SensorConfig;
use crate::consts::{AMPLIFIER_READY_POLL_MS, AMPLIFIER_READY_TIMEOUT_MS, CHANNEL_COUNT};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// One raw conversion per logical channel, in slot order.
pub type RawReading = [i32; CHANNEL_COUNT];

/// Amplifier gain setting.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Gain {
    /// 32× amplification, the first tap of each amplifier.
    Gain32,
    /// 64× amplification, the second tap of each amplifier.
    Gain64,
}

/// Narrow interface to one strain-gauge amplifier.
pub trait LoadCellAmplifier {
    /// Driver error type.
    type Error;

    /// Wakes the amplifier up.
    fn power_up(&mut self) -> Result<(), Self::Error>;

    /// Puts the amplifier into its low-power state.
    fn power_down(&mut self) -> Result<(), Self::Error>;

    /// Selects the gain used for the following conversions.
    fn set_gain(&mut self, gain: Gain) -> Result<(), Self::Error>;

    /// Whether a conversion is ready to be clocked out.
    fn is_ready(&mut self) -> Result<bool, Self::Error>;

    /// Clocks out one conversion. Only called after [`is_ready`](Self::is_ready)
    /// returned `true`.
    fn read(&mut self) -> Result<i32, Self::Error>;
}

/// Narrow interface to the temperature probe.
pub trait TemperatureProbe {
    /// Driver error type.
    type Error;

    /// Starts a conversion on every probe on the bus and waits for it.
    fn request_conversion(&mut self) -> Result<(), Self::Error>;

    /// Reads back the last conversion of the probe at `index`.
    fn read_channel(&mut self, index: u8) -> Result<f32, Self::Error>;
}

/// Errors raised by the measurement hardware.
#[derive(Debug, thiserror::Error)]
pub enum Error<AmpE, ProbeE> {
    /// An amplifier driver failed.
    #[error("load-cell amplifier error: {0:?}")]
    Amplifier(AmpE),
    /// The temperature probe driver failed.
    #[error("temperature probe error: {0:?}")]
    Probe(ProbeE),
}

/// Anything that can produce raw load-cell readings and a temperature.
///
/// The dispatcher only depends on this trait, so the calibration and
/// protocol logic can run against a simulated scale.
pub trait WeighingSystem {
    /// Measurement error type.
    type Error;

    /// Runs one measurement cycle, averaging `samples` conversions per slot.
    fn measure(&mut self, samples: u16) -> Result<RawReading, Self::Error>;

    /// Reads the probe-defined temperature value.
    fn read_temperature(&mut self) -> Result<f32, Self::Error>;

    /// Measures and folds the raw slots through the per-channel calibration.
    fn compute_mass(&mut self, config: &SensorConfig) -> Result<f32, Self::Error> {
        let raw = self.measure(config.sample_average_count)?;
        Ok(config.combined_mass(&raw))
    }
}

impl SensorConfig {
    /// Applies `gain[i] * raw[i] + offset[i]` to every slot.
    pub fn channel_values(&self, raw: &RawReading) -> [f32; CHANNEL_COUNT] {
        let mut values = [0.0; CHANNEL_COUNT];
        for (i, value) in values.iter_mut().enumerate() {
            *value = self.channel_gain[i] * raw[i] as f32 + self.channel_offset[i];
        }
        values
    }

    /// Sum of the calibrated channel values.
    pub fn combined_mass(&self, raw: &RawReading) -> f32 {
        self.channel_values(raw).iter().sum()
    }

    /// Applies the instrument calibration and the tare to a combined mass.
    pub fn reported_mass(&self, combined: f32) -> f32 {
        combined * self.instrument_gain + self.instrument_offset + self.tare_offset
    }
}

/// The node's measurement hardware: two amplifiers, a temperature probe
/// and a status indicator that is lit while a measurement runs.
#[derive(Debug)]
pub struct Scale<AMP, PROBE, LED, D>
where
    AMP: LoadCellAmplifier,
    PROBE: TemperatureProbe,
    LED: OutputPin,
    D: DelayNs,
{
    amplifiers: [AMP; 2],
    probe: PROBE,
    status: LED,
    delay: D,
    /// Raw slots of the most recent measurement cycle.
    pub last_raw: RawReading,
}

impl<AMP, PROBE, LED, D> Scale<AMP, PROBE, LED, D>
where
    AMP: LoadCellAmplifier,
    PROBE: TemperatureProbe,
    LED: OutputPin,
    D: DelayNs,
{
    /// Creates the pipeline. The status indicator is driven low.
    pub fn new(amplifiers: [AMP; 2], probe: PROBE, status: LED, delay: D) -> Self {
        let mut scale = Self {
            amplifiers,
            probe,
            status,
            delay,
            last_raw: [0; CHANNEL_COUNT],
        };
        scale.write_status(false);
        scale
    }

    /// Brings the hardware into its idle state at boot.
    ///
    /// Each amplifier has its latched conversion clocked out and is powered
    /// down. The probe runs one conversion whose result is discarded, since
    /// the first conversion after power-up is unreliable. Both steps are
    /// repeated by every measurement, so a failure here is not fatal.
    pub fn init(&mut self) -> Result<(), Error<AMP::Error, PROBE::Error>> {
        for index in 0..self.amplifiers.len() {
            let flushed = match self.wait_ready(index) {
                Ok(true) => self.amplifiers[index].read().map(|_| ()),
                Ok(false) => {
                    warn!("amplifier {} not ready at boot", index + 1);
                    Ok(())
                }
                Err(e) => Err(e),
            };
            let powered_down = self.amplifiers[index].power_down();
            flushed.and(powered_down).map_err(Error::Amplifier)?;
        }
        self.probe.request_conversion().map_err(Error::Probe)
    }

    /// Releases the hardware.
    pub fn release(self) -> ([AMP; 2], PROBE, LED, D) {
        (self.amplifiers, self.probe, self.status, self.delay)
    }

    fn write_status(&mut self, lit: bool) {
        if lit {
            let _ = self.status.set_high();
        } else {
            let _ = self.status.set_low();
        }
    }

    /// Polls `amplifiers[index]` until it is ready or the budget runs out.
    fn wait_ready(&mut self, index: usize) -> Result<bool, AMP::Error> {
        let mut waited = 0;
        loop {
            if self.amplifiers[index].is_ready()? {
                return Ok(true);
            }
            if waited >= AMPLIFIER_READY_TIMEOUT_MS {
                return Ok(false);
            }
            self.delay.delay_ms(AMPLIFIER_READY_POLL_MS);
            waited += AMPLIFIER_READY_POLL_MS;
        }
    }

    /// Averages `samples` conversions at the current gain.
    ///
    /// Returns `None` if the amplifier stopped signalling readiness.
    fn read_average(&mut self, index: usize, samples: u16) -> Result<Option<i32>, AMP::Error> {
        let samples = samples.max(1);
        let mut sum: i64 = 0;
        for _ in 0..samples {
            if !self.wait_ready(index)? {
                return Ok(None);
            }
            sum += i64::from(self.amplifiers[index].read()?);
        }
        Ok(Some((sum / i64::from(samples)) as i32))
    }

    /// Reads both gain taps of one amplifier, `None` on a readiness timeout.
    fn read_amplifier(&mut self, index: usize, samples: u16) -> Result<Option<[i32; 2]>, AMP::Error> {
        // flush the conversions latched before power-up at both gains
        for gain in [Gain::Gain32, Gain::Gain64] {
            self.amplifiers[index].set_gain(gain)?;
            if self.read_average(index, 1)?.is_none() {
                return Ok(None);
            }
        }
        if !self.wait_ready(index)? {
            return Ok(None);
        }

        let mut taps = [0; 2];
        for (tap, gain) in taps.iter_mut().zip([Gain::Gain32, Gain::Gain64]) {
            self.amplifiers[index].set_gain(gain)?;
            match self.read_average(index, samples)? {
                Some(value) => *tap = value,
                None => return Ok(None),
            }
        }
        Ok(Some(taps))
    }

    fn measure_amplifier(&mut self, index: usize, samples: u16) -> Result<[i32; 2], AMP::Error> {
        self.amplifiers[index].power_up()?;
        let taps = self.read_amplifier(index, samples);
        let powered_down = self.amplifiers[index].power_down();
        let taps = match taps? {
            Some(taps) => taps,
            None => {
                warn!("amplifier {} not ready, reporting zeros", index + 1);
                [0; 2]
            }
        };
        powered_down?;
        Ok(taps)
    }

    fn measure_all(&mut self, samples: u16) -> Result<RawReading, AMP::Error> {
        let mut raw = [0; CHANNEL_COUNT];
        for index in 0..self.amplifiers.len() {
            let taps = self.measure_amplifier(index, samples)?;
            raw[2 * index..2 * index + 2].copy_from_slice(&taps);
        }
        Ok(raw)
    }
}

impl<AMP, PROBE, LED, D> WeighingSystem for Scale<AMP, PROBE, LED, D>
where
    AMP: LoadCellAmplifier,
    PROBE: TemperatureProbe,
    LED: OutputPin,
    D: DelayNs,
{
    type Error = Error<AMP::Error, PROBE::Error>;

    fn measure(&mut self, samples: u16) -> Result<RawReading, Self::Error> {
        self.last_raw = [0; CHANNEL_COUNT];
        self.write_status(true);
        let result = self.measure_all(samples);
        self.write_status(false);

        self.last_raw = result.map_err(Error::Amplifier)?;
        trace!(
            "raw reading {} {} {} {}",
            self.last_raw[0],
            self.last_raw[1],
            self.last_raw[2],
            self.last_raw[3]
        );
        Ok(self.last_raw)
    }

    fn read_temperature(&mut self) -> Result<f32, Self::Error> {
        self.write_status(true);
        let result = self
            .probe
            .request_conversion()
            .and_then(|()| self.probe.read_channel(0));
        self.write_status(false);
        result.map_err(Error::Probe)
    }
}
