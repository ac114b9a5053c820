//! Bit-banged driver for the HX711 family of load cell amplifiers.
//!
//! The device has no register map. Everything happens on two lines: DT goes
//! low when a conversion is ready, then each SCK pulse shifts out one data
//! bit. After the 24 data bits, one to three extra pulses program the gain
//! and input channel of the *next* conversion.

pub mod calibration;
pub mod filter;
pub mod shared;

#[cfg(test)]
pub(crate) mod sim;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::Scale;
use calibration::ChannelCalibration;

/// Smallest value a 24-bit conversion can decode to.
pub const HX711_MINIMUM: i32 = -(1 << 23);
/// Largest value a 24-bit conversion can decode to.
pub const HX711_MAXIMUM: i32 = (1 << 23) - 1;

/// Most samples a single filtered operation may request. Samples are
/// collected on the stack.
pub const MAX_SAMPLES: usize = 128;

const CLOCK_DELAY_US: u32 = 1;
// datasheet minimum is 60us of SCK high to enter power down
const POWER_SETTLE_US: u32 = 100;
const READY_POLL_INTERVAL_US: u32 = 100;
// a 10SPS part coming out of power down needs ~400ms for its first conversion
const DEFAULT_READY_TIMEOUT_US: u32 = 500_000;

/// Driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<PinE> {
    /// The clock or data line failed.
    Pin(PinE),
    /// No conversion became ready within the configured window.
    Timeout,
    /// The requested sample count is outside `1..=MAX_SAMPLES`.
    InvalidSampleCount,
    /// A reference unit of zero cannot scale a reading.
    ZeroReferenceUnit,
}

/// Amplifier gain selection.
///
/// The discriminant is the number of extra clock pulses sent after the 24
/// data bits; it also fixes the input channel of the next conversion, so an
/// invalid gain/channel pairing cannot be expressed.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GainMode {
    /// Channel A, gain 128. One extra pulse. Power-on default.
    A128 = 1,
    /// Channel B, gain 32. Two extra pulses.
    B32 = 2,
    /// Channel A, gain 64. Three extra pulses.
    A64 = 3,
}

impl GainMode {
    fn extra_pulses(self) -> u8 {
        self as u8
    }

    /// The input channel this gain selects.
    pub fn channel(self) -> Channel {
        match self {
            GainMode::A128 | GainMode::A64 => Channel::A,
            GainMode::B32 => Channel::B,
        }
    }
}

/// Input channel. Each channel carries its own calibration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    fn index(self) -> usize {
        self as usize
    }

    /// The gain used when an operation has to switch the device over to
    /// this channel.
    pub fn default_gain(self) -> GainMode {
        match self {
            Channel::A => GainMode::A128,
            Channel::B => GainMode::B32,
        }
    }
}

/// Packing order for bits within a byte and bytes within a frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// Device power state, driven by `power_down` / `power_up`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PowerState {
    Active,
    PoweredDown,
}

/// HX711 driver.
///
/// Owns the two wires, the active gain selection, the power state and the
/// per-channel calibration. All operations take `&mut self`, so a frame can
/// never be interleaved with another caller's; see [`shared::SharedScale`]
/// for a multi-caller wrapper.
pub struct Hx711<SckPin, DTPin, Delay> {
    sck_pin: SckPin,
    dt_pin: DTPin,
    delay: Delay,
    gain_mode: GainMode,
    power_state: PowerState,
    calibration: [ChannelCalibration; 2],
    bit_order: BitOrder,
    byte_order: BitOrder,
    ready_timeout_us: u32,
    last_reading: i32,
}

impl<SckPin, DTPin, Delay, E> Hx711<SckPin, DTPin, Delay>
where
    SckPin: OutputPin<Error = E>,
    DTPin: InputPin<Error = E>,
    Delay: DelayNs,
{
    /// Create a driver and bring the device into a known state.
    ///
    /// Drives the clock low, waits the power-up settle time and performs one
    /// discard read so the device is programmed for channel A, gain 128.
    pub fn new(mut sck_pin: SckPin, dt_pin: DTPin, delay: Delay) -> Result<Self, Error<E>> {
        sck_pin.set_low().map_err(Error::Pin)?;
        let mut hx711 = Self {
            sck_pin,
            dt_pin,
            delay,
            gain_mode: GainMode::A128,
            power_state: PowerState::Active,
            calibration: [ChannelCalibration::default(); 2],
            bit_order: BitOrder::MsbFirst,
            byte_order: BitOrder::MsbFirst,
            ready_timeout_us: DEFAULT_READY_TIMEOUT_US,
            last_reading: 0,
        };
        hx711.delay.delay_us(POWER_SETTLE_US);
        // program the gain register before the first meaningful read
        hx711.read_raw()?;
        Ok(hx711)
    }

    /// Whether a conversion is waiting to be shifted out (DT low).
    pub fn is_ready(&mut self) -> Result<bool, Error<E>> {
        self.dt_pin.is_low().map_err(Error::Pin)
    }

    fn wait_until_ready(&mut self) -> Result<(), Error<E>> {
        let mut waited_us = 0u32;
        while !self.is_ready()? {
            if waited_us >= self.ready_timeout_us {
                log::warn!("no conversion ready after {}us", waited_us);
                return Err(Error::Timeout);
            }
            self.delay.delay_us(READY_POLL_INTERVAL_US);
            waited_us += READY_POLL_INTERVAL_US;
        }
        Ok(())
    }

    /// One clock pulse; the data line is sampled while the clock is high.
    fn read_bit(&mut self) -> Result<bool, Error<E>> {
        self.sck_pin.set_high().map_err(Error::Pin)?;
        self.delay.delay_us(CLOCK_DELAY_US);
        let bit = self.dt_pin.is_high().map_err(Error::Pin)?;
        self.sck_pin.set_low().map_err(Error::Pin)?;
        self.delay.delay_us(CLOCK_DELAY_US);
        Ok(bit)
    }

    fn pulse(&mut self) -> Result<(), Error<E>> {
        self.sck_pin.set_high().map_err(Error::Pin)?;
        self.delay.delay_us(CLOCK_DELAY_US);
        self.sck_pin.set_low().map_err(Error::Pin)?;
        self.delay.delay_us(CLOCK_DELAY_US);
        Ok(())
    }

    /// Acquire one frame: wait for the device, shift out 24 bits, send the
    /// gain-select pulses and decode the two's complement result.
    ///
    /// The gain pulses program the *next* conversion; a gain change
    /// therefore takes effect one frame late.
    pub fn read_raw(&mut self) -> Result<i32, Error<E>> {
        self.wait_until_ready()?;

        let mut bytes = [0u8; 3];
        for byte in bytes.iter_mut() {
            for position in 0..8 {
                let bit = self.read_bit()? as u8;
                *byte = match self.bit_order {
                    BitOrder::MsbFirst => (*byte << 1) | bit,
                    BitOrder::LsbFirst => *byte | (bit << position),
                };
            }
        }

        for _ in 0..self.gain_mode.extra_pulses() {
            self.pulse()?;
        }

        let [first, second, third] = bytes;
        let unsigned = match self.byte_order {
            BitOrder::MsbFirst => {
                ((first as u32) << 16) | ((second as u32) << 8) | (third as u32)
            }
            BitOrder::LsbFirst => {
                ((third as u32) << 16) | ((second as u32) << 8) | (first as u32)
            }
        };

        // sign extend bit 23
        let signed = if unsigned & 0x80_0000 != 0 {
            (unsigned | 0xFF00_0000) as i32
        } else {
            unsigned as i32
        };
        self.last_reading = signed;
        Ok(signed)
    }

    /// The most recent decoded frame.
    pub fn last_reading(&self) -> i32 {
        self.last_reading
    }

    fn collect(&mut self, times: usize) -> Result<heapless::Vec<i32, MAX_SAMPLES>, Error<E>> {
        if times < 1 || times > MAX_SAMPLES {
            return Err(Error::InvalidSampleCount);
        }
        let mut samples = heapless::Vec::new();
        for _ in 0..times {
            samples.push(self.read_raw()?).ok();
        }
        Ok(samples)
    }

    /// Collect `times` samples on `channel` and reduce them with `filter`.
    ///
    /// If the device is currently configured for the other channel, the
    /// active gain is saved, the channel's default gain is programmed for
    /// the duration of the reads, and the saved gain is restored afterwards.
    fn read_filtered(
        &mut self,
        channel: Channel,
        times: usize,
        filter: fn(&mut [i32]) -> f32,
    ) -> Result<f32, Error<E>> {
        let saved = (self.gain_mode.channel() != channel).then_some(self.gain_mode);
        if saved.is_some() {
            self.set_gain_mode(channel.default_gain())?;
        }
        let filtered = self.collect(times).map(|mut samples| filter(&mut samples));
        if let Some(previous) = saved {
            self.set_gain_mode(previous)?;
        }
        filtered
    }

    /// Median-filtered reading on `channel` with the offset subtracted, in
    /// raw counts. Useful for computing a reference unit against a known
    /// mass.
    pub fn get_value(&mut self, channel: Channel, times: usize) -> Result<f32, Error<E>> {
        let filtered = self.read_filtered(channel, times, filter::median)?;
        Ok(self.calibration[channel.index()].value(filtered))
    }

    /// Median-filtered weight on `channel`, in whatever unit the reference
    /// unit was calibrated against.
    pub fn get_weight(&mut self, channel: Channel, times: usize) -> Result<f32, Error<E>> {
        let filtered = self.read_filtered(channel, times, filter::median)?;
        Ok(self.calibration[channel.index()].weight(filtered))
    }

    /// Define the current load on `channel` as zero.
    ///
    /// Uses a trimmed mean rather than the median: a calibration point is
    /// worth the extra samples, and mechanical shocks during taring must not
    /// bias the stored offset.
    pub fn tare(&mut self, channel: Channel, times: usize) -> Result<i32, Error<E>> {
        let filtered = self.read_filtered(channel, times, filter::trimmed_mean)?;
        let offset = filtered as i32;
        self.calibration[channel.index()].offset = offset;
        log::debug!("tared channel {:?}: offset {}", channel, offset);
        Ok(offset)
    }

    pub fn get_offset(&self, channel: Channel) -> i32 {
        self.calibration[channel.index()].offset
    }

    pub fn set_offset(&mut self, channel: Channel, offset: i32) {
        self.calibration[channel.index()].offset = offset;
    }

    pub fn get_reference_unit(&self, channel: Channel) -> f32 {
        self.calibration[channel.index()].reference_unit
    }

    /// Set the raw-counts-per-physical-unit factor for `channel`.
    pub fn set_reference_unit(&mut self, channel: Channel, unit: f32) -> Result<(), Error<E>> {
        if unit == 0.0 {
            return Err(Error::ZeroReferenceUnit);
        }
        self.calibration[channel.index()].reference_unit = unit;
        Ok(())
    }

    pub fn get_gain_mode(&self) -> GainMode {
        self.gain_mode
    }

    /// Select the gain for subsequent reads.
    ///
    /// Performs one discard frame immediately: the device applies the
    /// selection at the end of a frame, so without the discard the next
    /// meaningful read would still use the old gain.
    pub fn set_gain_mode(&mut self, mode: GainMode) -> Result<(), Error<E>> {
        self.gain_mode = mode;
        self.sck_pin.set_low().map_err(Error::Pin)?;
        self.read_raw()?;
        Ok(())
    }

    /// How raw bits are packed into each of the three frame bytes.
    pub fn set_bit_order(&mut self, order: BitOrder) {
        self.bit_order = order;
    }

    /// How the three frame bytes are assembled into the 24-bit value.
    pub fn set_byte_order(&mut self, order: BitOrder) {
        self.byte_order = order;
    }

    /// Bound the wait for a conversion. `Error::Timeout` is returned once a
    /// read has waited this long.
    pub fn set_ready_timeout_us(&mut self, timeout_us: u32) {
        self.ready_timeout_us = timeout_us;
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    /// Put the device to sleep by holding the clock high.
    pub fn power_down(&mut self) -> Result<(), Error<E>> {
        self.sck_pin.set_low().map_err(Error::Pin)?;
        self.sck_pin.set_high().map_err(Error::Pin)?;
        self.delay.delay_us(POWER_SETTLE_US);
        self.power_state = PowerState::PoweredDown;
        log::debug!("device powered down");
        Ok(())
    }

    /// Wake the device.
    ///
    /// Power down wipes the gain register back to channel A, gain 128; if a
    /// different gain is configured, one discard frame re-asserts it.
    pub fn power_up(&mut self) -> Result<(), Error<E>> {
        self.sck_pin.set_low().map_err(Error::Pin)?;
        self.delay.delay_us(POWER_SETTLE_US);
        self.power_state = PowerState::Active;
        log::debug!("device powered up");
        if self.gain_mode != GainMode::A128 {
            self.read_raw()?;
        }
        Ok(())
    }

    /// Power cycle the device.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        self.power_down()?;
        self.power_up()
    }

    /// Release the two wires.
    pub fn release(self) -> (SckPin, DTPin) {
        (self.sck_pin, self.dt_pin)
    }
}

impl<SckPin, DTPin, Delay, E> Scale for Hx711<SckPin, DTPin, Delay>
where
    SckPin: OutputPin<Error = E>,
    DTPin: InputPin<Error = E>,
    Delay: DelayNs,
{
    type Error = Error<E>;

    fn get_weight(&mut self, channel: Channel, times: usize) -> Result<f32, Error<E>> {
        Hx711::get_weight(self, channel, times)
    }

    fn tare(&mut self, channel: Channel, times: usize) -> Result<i32, Error<E>> {
        Hx711::tare(self, channel, times)
    }

    fn set_reference_unit(&mut self, channel: Channel, unit: f32) -> Result<(), Error<E>> {
        Hx711::set_reference_unit(self, channel, unit)
    }

    fn set_gain_mode(&mut self, mode: GainMode) -> Result<(), Error<E>> {
        Hx711::set_gain_mode(self, mode)
    }

    fn power_down(&mut self) -> Result<(), Error<E>> {
        Hx711::power_down(self)
    }

    fn power_up(&mut self) -> Result<(), Error<E>> {
        Hx711::power_up(self)
    }

    fn reset(&mut self) -> Result<(), Error<E>> {
        Hx711::reset(self)
    }
}
