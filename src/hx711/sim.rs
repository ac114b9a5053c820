//! Test support: an in-memory device on the other end of the two wires.
//!
//! The simulator implements the embedded-hal pin and delay traits over a
//! shared state machine, so the driver exercises the exact same code paths
//! it runs against hardware. It serves a configurable 24-bit conversion,
//! applies the gain-select pulse tail, models power down (clock held high
//! for at least 60us) and counts callers that probe the data line in the
//! middle of someone else's frame.

use std::sync::{Arc, Mutex, MutexGuard};

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use super::GainMode;

const POWER_DOWN_NS: u32 = 60_000;

pub struct SimState {
    /// 24-bit pattern served for every conversion.
    pub value: u32,
    /// Gain the device is currently configured for.
    pub mode: GainMode,
    pub powered_down: bool,
    /// Extra-pulse count of every completed frame, in order.
    pub frames: Vec<u8>,
    /// Ready polls observed in the middle of a frame.
    pub violations: usize,
    sck_high: bool,
    pulses: u8,
    pending_extra: u8,
}

impl SimState {
    fn rising_edge(&mut self) {
        if self.powered_down {
            return;
        }
        self.pulses += 1;
        if self.pulses > 24 {
            self.pending_extra += 1;
        }
    }

    /// Level of the data line for the current clock state.
    fn read_dout(&mut self) -> bool {
        if self.sck_high {
            if (1..=24).contains(&self.pulses) {
                // bit 23 first
                let shift = 24 - self.pulses as u32;
                return (self.value >> shift) & 1 == 1;
            }
            return true;
        }
        if self.powered_down {
            return true;
        }
        if self.pulses == 0 {
            // idle with a conversion ready
            return false;
        }
        if self.pending_extra >= 1 {
            self.finish_frame();
            return false;
        }
        // someone polled for readiness while a frame was mid-flight
        self.violations += 1;
        true
    }

    fn finish_frame(&mut self) {
        let extra = self.pending_extra;
        self.frames.push(extra);
        self.mode = match extra {
            1 => GainMode::A128,
            2 => GainMode::B32,
            3 => GainMode::A64,
            other => panic!("frame ended with {other} gain pulses"),
        };
        self.pulses = 0;
        self.pending_extra = 0;
    }

    /// Finalize a frame the driver has fully pulsed out but not yet
    /// followed with another ready poll.
    pub fn flush(&mut self) {
        if self.pending_extra >= 1 {
            self.finish_frame();
        }
    }

    fn enter_power_down(&mut self) {
        self.powered_down = true;
        self.mode = GainMode::A128;
        self.pulses = 0;
        self.pending_extra = 0;
    }
}

/// Handle to a simulated device. Clones share the same state.
#[derive(Clone)]
pub struct SimDevice(Arc<Mutex<SimState>>);

impl SimDevice {
    pub fn new(value: u32) -> Self {
        Self(Arc::new(Mutex::new(SimState {
            value,
            mode: GainMode::A128,
            powered_down: false,
            frames: Vec::new(),
            violations: 0,
            sck_high: false,
            pulses: 0,
            pending_extra: 0,
        })))
    }

    /// The wires and delay to hand to the driver.
    pub fn lines(&self) -> (SckLine, DtLine, SimDelay) {
        (
            SckLine(self.clone()),
            DtLine(self.clone()),
            SimDelay(self.clone()),
        )
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }

    pub fn set_value(&self, value: u32) {
        self.state().value = value;
    }
}

/// The driver-owned clock line.
pub struct SckLine(SimDevice);

impl ErrorType for SckLine {
    type Error = Infallible;
}

impl OutputPin for SckLine {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut state = self.0.state();
        if state.sck_high {
            state.sck_high = false;
            // the falling edge wakes a powered-down device
            state.powered_down = false;
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut state = self.0.state();
        if !state.sck_high {
            state.sck_high = true;
            state.rising_edge();
        }
        Ok(())
    }
}

/// The device-owned data line.
pub struct DtLine(SimDevice);

impl ErrorType for DtLine {
    type Error = Infallible;
}

impl InputPin for DtLine {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.state().read_dout())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.state().read_dout())
    }
}

/// Delay source that also models the passage of time for the device: a
/// delay with the clock held high long enough enters power down.
pub struct SimDelay(SimDevice);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        let mut state = self.0.state();
        if state.sck_high && ns >= POWER_DOWN_NS {
            state.enter_power_down();
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_ns(us.saturating_mul(1_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay_ns(ms.saturating_mul(1_000_000));
    }
}
