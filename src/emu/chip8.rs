use rand::{RngCore, SeedableRng, rngs::StdRng};

use super::{Chip8Error, Chip8Result, Chip8State, Config, MEMORY_SIZE, Mode, Opcode, snapshot};
use crate::u4;

/// CHIP-8 virtual machine: processor state plus the collaborators the
/// instructions need (random source and behaviour switches).
pub struct Chip8<R = StdRng> {
    pub(crate) state: Chip8State,
    pub(crate) rng: R,
    pub(crate) config: Config,
}

impl Chip8 {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Uses a process-lifetime `StdRng` seeded once from the OS.
    pub fn with_config(config: Config) -> Self {
        Self::with_rng(StdRng::from_os_rng(), config)
    }
}

impl<R: RngCore> Chip8<R> {
    pub fn with_rng(rng: R, config: Config) -> Self {
        Chip8 {
            state: Chip8State::new(),
            rng,
            config,
        }
    }

    /// Resets the machine and loads `program` at the program start address.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), Chip8Error> {
        self.state.load_program(program)?;
        log::debug!("Loaded {} byte program", program.len());
        Ok(())
    }

    /// Returns to the blank power-on state. There is no separate unloaded state.
    pub fn unload_program(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.state.reset();
        log::debug!("Machine reset");
    }

    /// Executes a single CPU cycle (fetch, decode, execute), then ticks the
    /// delay and sound timers.
    ///
    /// While parked on Fx0A no instruction is fetched; the cycle only looks
    /// for a key press. A cycle that returns `Err` changes nothing, timers
    /// included.
    pub fn run_cycle(&mut self) -> Result<Chip8Result, Chip8Error> {
        let result = match self.state.mode {
            Mode::AwaitingKey {
                x,
                baseline,
                latched,
            } => self.resume_wait_for_key(x, baseline, latched),
            Mode::Running => {
                let opcode = self.fetch()?;
                let decoded_opcode = Opcode::decode(opcode);
                log::trace!("{:#06X}: {opcode:04X} {decoded_opcode}", self.state.pc);
                self.execute(decoded_opcode)?
            }
        };

        self.timers_cycle();
        Ok(result)
    }

    fn timers_cycle(&mut self) {
        self.state.delay_timer = self.state.delay_timer.saturating_sub(1);
        self.state.sound_timer = self.state.sound_timer.saturating_sub(1);
    }

    /// Returns true if the sound timer is greater than zero, indicating a beep should be played.
    pub fn should_beep(&self) -> bool {
        self.state.sound_timer > 0
    }

    /// Set the state of a key on the keypad.
    ///
    /// While parked on Fx0A a key going down is latched, so a tap shorter
    /// than a cycle still completes the wait.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        if let Mode::AwaitingKey { latched, .. } = &mut self.state.mode
            && pressed
            && !self.state.keypad[key]
        {
            latched[key] = true;
        }
        self.state.keypad[key] = pressed;
    }

    /// Get the state of a pixel on the display (true = on, false = off).
    pub fn get_display_pixel(&self, y: usize, x: usize) -> bool {
        self.state.display[y][x]
    }

    pub fn state(&self) -> &Chip8State {
        &self.state
    }

    /// Direct write access for inspectors and debuggers.
    pub fn state_mut(&mut self) -> &mut Chip8State {
        &mut self.state
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Encodes the whole processor state as a save state image.
    pub fn save_state(&self) -> Vec<u8> {
        snapshot::encode(&self.state)
    }

    /// Replaces the processor state with a decoded save state image.
    ///
    /// The image is fully validated first; on error the current state is kept.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), Chip8Error> {
        self.state = snapshot::decode(bytes)?;
        log::debug!("Restored save state, pc = {:#06X}", self.state.pc);
        Ok(())
    }

    /// Decodes `count` instruction words starting at `start`, stopping at the
    /// end of memory. Yields `(address, raw word, opcode)`.
    pub fn disassemble(&self, start: u16, count: usize) -> Vec<(u16, u16, Opcode)> {
        (0..count)
            .map(|n| usize::from(start) + n * 2)
            .take_while(|&addr| addr + 1 < MEMORY_SIZE)
            .map(|addr| {
                let word = u16::from_be_bytes([self.state.memory[addr], self.state.memory[addr + 1]]);
                (addr as u16, word, Opcode::decode(word))
            })
            .collect()
    }

    /// Fetches the next 16-bit opcode from memory.
    fn fetch(&self) -> Result<u16, Chip8Error> {
        let pc = self.state.pc;
        let bytes = self
            .state
            .mem_range(pc, 2)
            .map_err(|_| Chip8Error::ProgramCounterOutOfBounds { pc })?;

        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

impl Default for Chip8 {
    fn default() -> Self {
        Self::new()
    }
}
