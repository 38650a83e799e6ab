use super::{Chip8Error, DISPLAY_X, DISPLAY_Y, Display, FONT, FONT_END_ADDRESS, FONT_START_ADDRESS};
use crate::u4;

// CHIP-8 memory map
pub const PROGRAM_START: usize = 0x200;
pub const MEMORY_SIZE: usize = 4096;
pub const MAX_PROGRAM_SIZE: usize = MEMORY_SIZE - PROGRAM_START;
pub const STACK_SIZE: usize = 16;

/// Execution mode of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Running,
    /// Parked on Fx0A; `baseline` is the keypad as last observed, so only a
    /// released-to-pressed transition completes the wait. `latched` records
    /// keys that went down between cycles, even if released again since.
    AwaitingKey {
        x: u4,
        baseline: [bool; 16],
        latched: [bool; 16],
    },
}

/// CHIP-8 processor state.
///
/// Fields are public so inspectors can read and edit them directly; the core
/// validates nothing written here beyond the field types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chip8State {
    /// 4KB memory array
    pub memory: [u8; MEMORY_SIZE],
    /// Program counter: address of the next instruction to execute
    pub pc: u16,
    /// General-purpose registers V0-VF (VF is used as a flag register)
    pub v: [u8; 16],
    /// Index register: used for memory operations
    pub i: u16,
    /// Display buffer: 64x32 monochrome pixels, row major
    pub display: Display<bool>,
    /// Keypad state: 16 keys mapped as booleans (true = pressed)
    pub keypad: [bool; 16],

    pub delay_timer: u8,
    /// Beeps while non-zero
    pub sound_timer: u8,

    /// Number of return addresses currently on `stack`
    pub sp: u8,
    pub stack: [u16; STACK_SIZE],

    pub mode: Mode,
}

impl Chip8State {
    pub fn new() -> Self {
        let mut memory = [0; MEMORY_SIZE];
        memory[FONT_START_ADDRESS..FONT_END_ADDRESS].copy_from_slice(&FONT);

        Chip8State {
            memory,
            pc: PROGRAM_START as u16,
            v: [0; 16],
            i: 0,
            display: [[false; DISPLAY_X]; DISPLAY_Y],
            keypad: [false; 16],
            delay_timer: 0,
            sound_timer: 0,
            sp: 0,
            stack: [0; STACK_SIZE],
            mode: Mode::Running,
        }
    }

    /// Returns every field to its power-on value and reinstalls the font.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Resets, then copies `program` to [`PROGRAM_START`].
    ///
    /// An oversized program is rejected before anything is touched.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), Chip8Error> {
        if program.len() > MAX_PROGRAM_SIZE {
            return Err(Chip8Error::OversizedProgram {
                size: program.len(),
                max_size: MAX_PROGRAM_SIZE,
            });
        }

        self.reset();
        self.memory[PROGRAM_START..PROGRAM_START + program.len()].copy_from_slice(program);
        Ok(())
    }

    /// Return addresses currently pushed, oldest first.
    pub fn call_stack(&self) -> &[u16] {
        &self.stack[..usize::from(self.sp).min(STACK_SIZE)]
    }

    pub fn is_awaiting_key(&self) -> bool {
        matches!(self.mode, Mode::AwaitingKey { .. })
    }

    /// Bounds-checked view of `len` bytes starting at `addr`.
    pub(crate) fn mem_range(&self, addr: u16, len: usize) -> Result<&[u8], Chip8Error> {
        let start = usize::from(addr);
        self.memory
            .get(start..start + len)
            .ok_or(Chip8Error::MemoryOutOfBounds {
                address: start.max(MEMORY_SIZE),
            })
    }

    pub(crate) fn mem_range_mut(&mut self, addr: u16, len: usize) -> Result<&mut [u8], Chip8Error> {
        let start = usize::from(addr);
        self.memory
            .get_mut(start..start + len)
            .ok_or(Chip8Error::MemoryOutOfBounds {
                address: start.max(MEMORY_SIZE),
            })
    }
}

impl Default for Chip8State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_has_font_and_program_start() {
        let state = Chip8State::new();
        assert_eq!(state.pc, 0x200);
        assert_eq!(state.sp, 0);
        assert_eq!(&state.memory[FONT_START_ADDRESS..FONT_END_ADDRESS], &FONT);
        assert!(state.memory[PROGRAM_START..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut once = Chip8State::new();
        once.v[3] = 9;
        once.display[4][5] = true;
        once.keypad[2] = true;
        once.reset();

        let mut twice = once.clone();
        twice.reset();

        assert_eq!(once, twice);
        assert_eq!(once, Chip8State::new());
    }

    #[test]
    fn load_program_copies_bytes_after_reset() {
        let mut state = Chip8State::new();
        state.memory[0x300] = 0xAA;
        state.load_program(&[0x12, 0x34]).unwrap();

        assert_eq!(state.memory[0x200], 0x12);
        assert_eq!(state.memory[0x201], 0x34);
        assert_eq!(state.memory[0x300], 0);
    }

    #[test]
    fn load_program_accepts_exactly_max_size() {
        let mut state = Chip8State::new();
        let program = vec![0xEE; MAX_PROGRAM_SIZE];
        state.load_program(&program).unwrap();
        assert_eq!(state.memory[MEMORY_SIZE - 1], 0xEE);
    }

    #[test]
    fn oversized_program_is_rejected_without_side_effects() {
        let mut state = Chip8State::new();
        state.v[0] = 1;
        let before = state.clone();

        let err = state.load_program(&vec![0; MAX_PROGRAM_SIZE + 1]).unwrap_err();
        assert!(matches!(
            err,
            Chip8Error::OversizedProgram { size: 3585, max_size: 3584 }
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn mem_range_rejects_reads_past_end() {
        let state = Chip8State::new();
        assert!(state.mem_range(0xFFE, 2).is_ok());
        assert!(matches!(
            state.mem_range(0xFFF, 2),
            Err(Chip8Error::MemoryOutOfBounds { .. })
        ));
    }
}
