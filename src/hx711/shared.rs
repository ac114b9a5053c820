//! Exclusive shared access to a single scale.
//!
//! The wire protocol is stateful: a frame is 24 data pulses plus the gain
//! tail, and pulses from two callers mixed into one frame corrupt the
//! conversion. [`SharedScale`] wraps a scale in a
//! [`critical_section::Mutex`] so that every operation, including the
//! calibration setters, holds the device for its entire pulse sequence. No
//! caller can observe a torn offset/reference-unit pair, and no fairness is
//! guaranteed among blocked callers.

use core::cell::RefCell;

use critical_section::Mutex;

use super::{Channel, GainMode};
use crate::Scale;

/// A scale behind a critical-section mutex.
pub struct SharedScale<S> {
    inner: Mutex<RefCell<S>>,
}

impl<S: Scale> SharedScale<S> {
    pub fn new(scale: S) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(scale)),
        }
    }

    /// Run `operation` with exclusive access to the scale.
    pub fn with<R>(&self, operation: impl FnOnce(&mut S) -> R) -> R {
        critical_section::with(|cs| operation(&mut self.inner.borrow_ref_mut(cs)))
    }

    pub fn get_weight(&self, channel: Channel, times: usize) -> Result<f32, S::Error> {
        self.with(|scale| scale.get_weight(channel, times))
    }

    pub fn tare(&self, channel: Channel, times: usize) -> Result<i32, S::Error> {
        self.with(|scale| scale.tare(channel, times))
    }

    pub fn set_reference_unit(&self, channel: Channel, unit: f32) -> Result<(), S::Error> {
        self.with(|scale| scale.set_reference_unit(channel, unit))
    }

    pub fn set_gain_mode(&self, mode: GainMode) -> Result<(), S::Error> {
        self.with(|scale| scale.set_gain_mode(mode))
    }

    pub fn power_down(&self) -> Result<(), S::Error> {
        self.with(|scale| scale.power_down())
    }

    pub fn power_up(&self) -> Result<(), S::Error> {
        self.with(|scale| scale.power_up())
    }

    pub fn reset(&self) -> Result<(), S::Error> {
        self.with(|scale| scale.reset())
    }

    /// Take the scale back out of the wrapper.
    pub fn into_inner(self) -> S {
        self.inner.into_inner().into_inner()
    }
}
