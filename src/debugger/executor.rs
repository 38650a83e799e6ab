use std::{collections::HashSet, path::PathBuf};

use super::commands::{BreakpointAction, Command, CommandError, CommandResult, SetTarget};
use crate::{Chip8Error, Chip8Runner, Chip8RunnerResult, Chip8State, MEMORY_SIZE};

pub struct Executor {
    is_running: bool,
    runner: Chip8Runner,
    breakpoints: HashSet<u16>,
    /// The loaded ROM, kept for `reset`
    rom: Vec<u8>,
    snapshot_path: PathBuf,
}

impl Executor {
    /// `runner` is expected to already have `rom` loaded. Running mode
    /// pauses on unknown words so they can be inspected.
    pub fn new(mut runner: Chip8Runner, rom: Vec<u8>, snapshot_path: PathBuf) -> Self {
        runner.set_stop_on_unknown(true);
        Self {
            is_running: false,
            runner,
            breakpoints: HashSet::new(),
            rom,
            snapshot_path,
        }
    }

    /// Advances the machine while in running mode. Any stop condition
    /// (error, breakpoint, unknown instruction) pauses execution.
    pub fn poll(&mut self, dt: f32) -> Result<Chip8RunnerResult, Chip8Error> {
        if !self.is_running {
            return Ok(Chip8RunnerResult::Ok);
        }

        let result = self
            .runner
            .update_with_breakpoints(dt, Some(&self.breakpoints));

        if !matches!(result, Ok(Chip8RunnerResult::Ok)) {
            self.is_running = false;
        }

        result
    }

    pub fn execute(&mut self, command: Command) -> Result<CommandResult, CommandError> {
        match command {
            Command::Run => {
                self.run();
                Ok(CommandResult::Ok)
            }
            Command::Pause => {
                self.pause();
                Ok(CommandResult::Ok)
            }
            Command::Step { count } => self.step(count),
            Command::Breakpoint { action } => Ok(self.handle_breakpoint(action)),
            Command::Set { target, value } => self.handle_set(target, value),
            Command::Poke { addr, value } => self.handle_poke(addr, value),
            Command::Mem { start, len } => Ok(self.mem_dump(start, len)),
            Command::Disasm { start, len } => {
                let start = start.unwrap_or(self.state().pc);
                let instructions = self
                    .runner
                    .chip8_ref()
                    .disassemble(start, usize::from(len));
                Ok(CommandResult::Disasm { instructions })
            }
            Command::Save { path } => {
                let path = path.unwrap_or_else(|| self.snapshot_path.clone());
                std::fs::write(&path, self.runner.chip8_ref().save_state())?;
                Ok(CommandResult::Saved(path))
            }
            Command::Load { path } => {
                let path = path.unwrap_or_else(|| self.snapshot_path.clone());
                let bytes = std::fs::read(&path)?;
                self.runner.chip8_mut().load_state(&bytes)?;
                Ok(CommandResult::Loaded(path))
            }
            Command::Reset => {
                self.runner.chip8_mut().load_program(&self.rom)?;
                Ok(CommandResult::Ok)
            }
            Command::Eject => {
                self.pause();
                self.rom.clear();
                self.runner.chip8_mut().unload_program();
                Ok(CommandResult::Ok)
            }
            Command::Quit => Ok(CommandResult::Quit),
        }
    }

    pub fn run(&mut self) {
        self.is_running = true;
    }

    pub fn pause(&mut self) {
        self.is_running = false;
    }

    /// Executes up to `count` cycles, stopping at the first error.
    pub fn step(&mut self, count: usize) -> Result<CommandResult, CommandError> {
        for _ in 0..count {
            self.runner.chip8_mut().run_cycle()?;
        }
        Ok(CommandResult::Ok)
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn state(&self) -> &Chip8State {
        self.runner.chip8_ref().state()
    }

    pub fn breakpoints(&self) -> &HashSet<u16> {
        &self.breakpoints
    }

    pub fn runner(&self) -> &Chip8Runner {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut Chip8Runner {
        &mut self.runner
    }

    fn handle_breakpoint(&mut self, action: BreakpointAction) -> CommandResult {
        match action {
            BreakpointAction::Set { addr } => {
                self.breakpoints.insert(addr);
            }
            BreakpointAction::Clear { addr } => {
                self.breakpoints.remove(&addr);
            }
            BreakpointAction::ClearAll => {
                self.breakpoints.clear();
            }
            BreakpointAction::List => {
                let mut bps: Vec<u16> = self.breakpoints.iter().copied().collect();
                bps.sort();
                return CommandResult::Breakpoints(bps);
            }
        };

        CommandResult::Ok
    }

    fn handle_set(&mut self, target: SetTarget, value: u16) -> Result<CommandResult, CommandError> {
        let byte = |max: u16| {
            if value > max {
                Err(CommandError::ValueOutOfRange { value, max })
            } else {
                Ok(value as u8)
            }
        };
        let state = self.runner.chip8_mut().state_mut();

        match target {
            SetTarget::V(reg) => state.v[reg] = byte(0xFF)?,
            SetTarget::I => state.i = value,
            SetTarget::Pc => state.pc = value,
            SetTarget::Dt => state.delay_timer = byte(0xFF)?,
            SetTarget::St => state.sound_timer = byte(0xFF)?,
            SetTarget::Sp => state.sp = byte(16)?,
        }

        Ok(CommandResult::Ok)
    }

    fn handle_poke(&mut self, addr: u16, value: u8) -> Result<CommandResult, CommandError> {
        let cell = self
            .runner
            .chip8_mut()
            .state_mut()
            .memory
            .get_mut(usize::from(addr))
            .ok_or(CommandError::ValueOutOfRange {
                value: addr,
                max: MEMORY_SIZE as u16 - 1,
            })?;
        *cell = value;
        Ok(CommandResult::Ok)
    }

    fn mem_dump(&self, start: u16, len: u16) -> CommandResult {
        let start_idx = usize::from(start).min(MEMORY_SIZE);
        let end = (start_idx + usize::from(len)).min(MEMORY_SIZE);

        CommandResult::MemDump {
            data: self.state().memory[start_idx..end].to_vec(),
            offset: start,
        }
    }
}
