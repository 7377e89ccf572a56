//! Console and null effectors

use std::io::Write;

use log::{debug, warn};

use crate::device::Effector;

/// Effector that prints to a writer in place of a display and buzzer
pub struct ConsoleEffector<W: Write> {
    out: W,
}

impl<W: Write> ConsoleEffector<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl ConsoleEffector<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> Effector for ConsoleEffector<W> {
    fn show_status(&mut self, lines: &[String]) {
        let result = lines
            .iter()
            .try_for_each(|line| writeln!(self.out, "{line}"))
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!("Failed to write status lines: {}", e);
        }
    }

    fn buzz(&mut self, times: u32) {
        if let Err(e) = writeln!(self.out, "Buzzer beep x{times}") {
            warn!("Failed to write buzzer pulse: {}", e);
        }
    }
}

/// Effector for headless runs; commands are only logged
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEffector;

impl Effector for NullEffector {
    fn show_status(&mut self, lines: &[String]) {
        debug!("Status: {}", lines.join(" | "));
    }

    fn buzz(&mut self, times: u32) {
        debug!("Buzz x{}", times);
    }
}
