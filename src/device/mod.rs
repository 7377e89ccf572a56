//! Device capabilities
//!
//! Hardware sits behind two traits so that the interpreter and aggregator
//! never branch on whether a sensor or buzzer is present. A backend is
//! picked when the pipeline is composed.

mod console;
mod simulated;

pub use console::{ConsoleEffector, NullEffector};
pub use simulated::{ReplaySource, SimulatedSource};

use crate::types::RawReading;

/// Source of raw readings, one per tick
pub trait SampleSource {
    /// Next reading, or `None` once the source is exhausted
    fn next_reading(&mut self) -> Option<RawReading>;
}

/// Output device for status lines and buzzer pulses.
///
/// Both commands are fire-and-forget; a backend that fails to deliver one
/// logs it and carries on.
pub trait Effector {
    fn show_status(&mut self, lines: &[String]);

    fn buzz(&mut self, times: u32);
}

impl<T: Effector + ?Sized> Effector for Box<T> {
    fn show_status(&mut self, lines: &[String]) {
        (**self).show_status(lines)
    }

    fn buzz(&mut self, times: u32) {
        (**self).buzz(times)
    }
}
