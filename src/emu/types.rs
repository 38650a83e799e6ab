pub const DISPLAY_X: usize = 64;
pub const DISPLAY_Y: usize = 32;

/// A type alias for the CHIP-8 display buffer representation
pub type Display<T> = [[T; DISPLAY_X]; DISPLAY_Y];

/// Outcome of a single successful CPU cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip8Result {
    /// An instruction was executed.
    Continue,
    /// A draw instruction changed the display this cycle.
    Drew,
    /// The processor is parked on Fx0A until a key goes down.
    AwaitingKey,
    /// The word at PC did not decode; it was skipped as a no-op.
    UnknownInstruction { opcode: u16 },
}

/// Error types that can occur during CHIP-8 emulation.
///
/// A cycle that fails leaves the machine exactly as it was before the cycle.
#[derive(Debug, thiserror::Error)]
pub enum Chip8Error {
    #[error("Program is too large ({size} bytes), max size is {max_size} bytes")]
    OversizedProgram { size: usize, max_size: usize },

    #[error("Memory access out of bounds at address {address:#06X}")]
    MemoryOutOfBounds { address: usize },

    #[error("Program counter {pc:#06X} is outside of executable memory")]
    ProgramCounterOutOfBounds { pc: u16 },

    #[error("Stack overflow: subroutine call at {pc:#06X} exceeds 16 nested levels")]
    StackOverflow { pc: u16 },

    #[error("Stack underflow: return at {pc:#06X} with empty call stack")]
    StackUnderflow { pc: u16 },

    #[error("Corrupt save state: {0}")]
    CorruptState(#[from] SnapshotError),
}

/// Reasons a save state image is rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("missing save state header")]
    BadMagic,

    #[error("unsupported save state version {found}, expected {expected}")]
    UnsupportedVersion { found: u16, expected: u16 },

    #[error("save state is {found} bytes, expected {expected}")]
    LengthMismatch { found: usize, expected: usize },

    #[error("invalid value {value:#04X} for {field}")]
    InvalidField { field: &'static str, value: u8 },
}
