use std::collections::HashSet;

use super::{Chip8, Chip8Error, Chip8Result};
use crate::u4;

/// One cycle per 60 Hz frame, so the delay and sound timers (which tick once
/// per cycle) count down at their nominal rate.
pub const DEFAULT_CYCLE_HZ: f32 = 60.0;

/// High-level emulator runner that paces cycles from wall-clock time.
pub struct Chip8Runner {
    chip8: Chip8,
    cycle_time_step: f32,
    cpu_dt_accumulator: f32,
    stop_on_unknown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip8RunnerResult {
    Ok,
    HitBreakpoint { pc: u16 },
    /// The first unknown word skipped during the update.
    UnknownInstruction { pc: u16, opcode: u16 },
}

impl Chip8Runner {
    pub fn new(chip8: Chip8) -> Self {
        Self::with_cycle_hz(chip8, DEFAULT_CYCLE_HZ)
    }

    pub fn with_cycle_hz(chip8: Chip8, cycle_hz: f32) -> Self {
        Self {
            chip8,
            cycle_time_step: 1.0 / cycle_hz.max(1.0),
            cpu_dt_accumulator: 0.0,
            stop_on_unknown: false,
        }
    }

    /// When set, an update ends right after skipping an unknown word instead
    /// of only reporting it.
    pub fn set_stop_on_unknown(&mut self, stop: bool) {
        self.stop_on_unknown = stop;
    }

    /// Update emulator by delta time.
    ///
    /// Runs as many cycles as the elapsed time `dt` covers.
    pub fn update(&mut self, dt: f32) -> Result<Chip8RunnerResult, Chip8Error> {
        self.update_with_breakpoints(dt, None)
    }

    /// Like `update` but stops as soon as the program counter arrives at a
    /// breakpoint. A machine parked on Fx0A at a breakpoint does not hit it
    /// again on every parked cycle.
    ///
    /// Any early stop drops the time not yet spent, so resuming does not
    /// replay it in one burst.
    pub fn update_with_breakpoints(
        &mut self,
        dt: f32,
        breakpoints: Option<&HashSet<u16>>,
    ) -> Result<Chip8RunnerResult, Chip8Error> {
        self.cpu_dt_accumulator += dt;
        let mut outcome = Chip8RunnerResult::Ok;

        while self.cpu_dt_accumulator >= self.cycle_time_step {
            self.cpu_dt_accumulator -= self.cycle_time_step;

            let start_pc = self.chip8.state().pc;
            let result = self.chip8.run_cycle().inspect_err(|_| {
                // The failed cycle will fail again; don't queue up retries.
                self.cpu_dt_accumulator = 0.0;
            })?;

            if let Chip8Result::UnknownInstruction { opcode } = result {
                let unknown = Chip8RunnerResult::UnknownInstruction { pc: start_pc, opcode };
                if self.stop_on_unknown {
                    self.cpu_dt_accumulator = 0.0;
                    return Ok(unknown);
                }
                if outcome == Chip8RunnerResult::Ok {
                    outcome = unknown;
                }
            }

            let pc = self.chip8.state().pc;
            let parked_in_place = result == Chip8Result::AwaitingKey && pc == start_pc;
            if let Some(breakpoints) = &breakpoints
                && breakpoints.contains(&pc)
                && !parked_in_place
            {
                self.cpu_dt_accumulator = 0.0;
                return Ok(Chip8RunnerResult::HitBreakpoint { pc });
            }
        }

        Ok(outcome)
    }

    /// Returns true if the sound timer is active, indicating a beep should be played.
    pub fn should_beep(&self) -> bool {
        self.chip8.should_beep()
    }

    /// Set the state of a key on the keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.chip8.set_key(key, pressed)
    }

    /// Get the state of a pixel on the display (true = on, false = off).
    pub fn get_display_pixel(&self, y: usize, x: usize) -> bool {
        self.chip8.get_display_pixel(y, x)
    }

    pub fn chip8_ref(&self) -> &Chip8 {
        &self.chip8
    }

    pub fn chip8_mut(&mut self) -> &mut Chip8 {
        &mut self.chip8
    }
}
