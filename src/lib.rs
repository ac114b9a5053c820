#![cfg_attr(not(test), no_std)]

//! A platform agnostic driver for 24-bit bridge-sensor ADCs of the HX711
//! family, built on the [`embedded-hal`] 1.0 traits.
//!
//! The device is driven over two wires: the driver owns the clock line and
//! samples the data line, one bit per clock pulse. A conversion frame is 24
//! data bits followed by one to three extra pulses that select the gain (and
//! with it the input channel) of the next conversion.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/1.0
//!
//! # Example
//!
//! ```ignore
//! use bridgecell::hx711::{Channel, Hx711};
//! use bridgecell::Scale;
//!
//! let mut scale = Hx711::new(sck_pin, dt_pin, delay)?;
//! scale.tare(Channel::A, 15)?;
//! scale.set_reference_unit(Channel::A, 103.33)?;
//! let grams = scale.get_weight(Channel::A, 5)?;
//! ```

pub mod hx711;

use hx711::{Channel, GainMode};

/// A dual-channel weighing cell.
///
/// This is the surface a reporting layer consumes; everything else on the
/// concrete driver (raw reads, packing order, timeouts) is tuning.
pub trait Scale {
    type Error;

    /// Read the calibrated weight on `channel`, filtering `times` samples
    /// with a median.
    fn get_weight(&mut self, channel: Channel, times: usize) -> Result<f32, Self::Error>;

    /// Zero `channel` by averaging `times` samples with a trimmed mean.
    /// Returns the new raw offset.
    fn tare(&mut self, channel: Channel, times: usize) -> Result<i32, Self::Error>;

    /// Set the raw-counts-per-physical-unit scale factor for `channel`.
    /// A unit of zero is rejected.
    fn set_reference_unit(&mut self, channel: Channel, unit: f32) -> Result<(), Self::Error>;

    /// Select the amplifier gain, and with it the input channel, for
    /// subsequent conversions.
    fn set_gain_mode(&mut self, mode: GainMode) -> Result<(), Self::Error>;

    /// Put the device to sleep. The gain register resets to its power-on
    /// default.
    fn power_down(&mut self) -> Result<(), Self::Error>;

    /// Wake the device and re-assert any non-default gain.
    fn power_up(&mut self) -> Result<(), Self::Error>;

    /// `power_down` followed by `power_up`.
    fn reset(&mut self) -> Result<(), Self::Error>;
}
