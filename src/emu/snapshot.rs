//! Save state image of a [`Chip8State`].
//!
//! Layout (little endian): the `C8SS` magic, a `u16` version and a `u32`
//! payload length, followed by every state field in declaration order.
//! Booleans are stored as one byte each (0 or 1).

use super::{Chip8State, DISPLAY_X, DISPLAY_Y, MEMORY_SIZE, Mode, STACK_SIZE, SnapshotError};
use crate::u4;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"C8SS";
pub const SNAPSHOT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 4;
const PAYLOAD_LEN: usize = MEMORY_SIZE // memory
    + 2 // pc
    + 16 // v
    + 2 // i
    + DISPLAY_X * DISPLAY_Y // display
    + 16 // keypad
    + 1 // delay timer
    + 1 // sound timer
    + 1 // sp
    + STACK_SIZE * 2 // stack
    + 1 + 1 + 16 + 16; // mode tag, wait register, wait baseline, latched keys

/// Total size in bytes of an encoded snapshot.
pub const SNAPSHOT_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

pub fn encode(state: &Chip8State) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SNAPSHOT_LEN);

    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(PAYLOAD_LEN as u32).to_le_bytes());

    buf.extend_from_slice(&state.memory);
    buf.extend_from_slice(&state.pc.to_le_bytes());
    buf.extend_from_slice(&state.v);
    buf.extend_from_slice(&state.i.to_le_bytes());
    buf.extend(state.display.iter().flatten().map(|&px| u8::from(px)));
    buf.extend(state.keypad.iter().map(|&key| u8::from(key)));
    buf.push(state.delay_timer);
    buf.push(state.sound_timer);
    buf.push(state.sp);
    for addr in state.stack {
        buf.extend_from_slice(&addr.to_le_bytes());
    }

    match state.mode {
        Mode::Running => {
            buf.push(0);
            buf.push(0);
            buf.extend_from_slice(&[0; 32]);
        }
        Mode::AwaitingKey {
            x,
            baseline,
            latched,
        } => {
            buf.push(1);
            buf.push(x.get());
            buf.extend(baseline.iter().map(|&key| u8::from(key)));
            buf.extend(latched.iter().map(|&key| u8::from(key)));
        }
    }

    buf
}

/// Decodes and validates a snapshot. Nothing is returned unless every field
/// is well formed.
pub fn decode(bytes: &[u8]) -> Result<Chip8State, SnapshotError> {
    if bytes.len() != SNAPSHOT_LEN {
        // A wrong magic is the more useful report for foreign files.
        if bytes.get(..4) != Some(&SNAPSHOT_MAGIC[..]) {
            return Err(SnapshotError::BadMagic);
        }
        return Err(SnapshotError::LengthMismatch {
            found: bytes.len(),
            expected: SNAPSHOT_LEN,
        });
    }

    let mut reader = Reader { buf: bytes };

    if reader.array::<4>()? != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = u16::from_le_bytes(reader.array()?);
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }
    let payload_len = u32::from_le_bytes(reader.array()?) as usize;
    if payload_len != PAYLOAD_LEN {
        return Err(SnapshotError::LengthMismatch {
            found: payload_len,
            expected: PAYLOAD_LEN,
        });
    }

    let mut state = Chip8State::new();
    state.memory = reader.array()?;
    state.pc = u16::from_le_bytes(reader.array()?);
    state.v = reader.array()?;
    state.i = u16::from_le_bytes(reader.array()?);
    for row in state.display.iter_mut() {
        for px in row.iter_mut() {
            *px = reader.flag("display")?;
        }
    }
    state.keypad = reader.flags("keypad")?;
    state.delay_timer = reader.byte()?;
    state.sound_timer = reader.byte()?;

    state.sp = reader.byte()?;
    if usize::from(state.sp) > STACK_SIZE {
        return Err(SnapshotError::InvalidField {
            field: "stack pointer",
            value: state.sp,
        });
    }
    for addr in state.stack.iter_mut() {
        *addr = u16::from_le_bytes(reader.array()?);
    }

    let tag = reader.byte()?;
    let register = reader.byte()?;
    let baseline = reader.flags("wait baseline")?;
    let latched = reader.flags("latched keys")?;
    state.mode = match tag {
        0 => Mode::Running,
        1 => Mode::AwaitingKey {
            x: u4::try_from(register).map_err(|value| SnapshotError::InvalidField {
                field: "wait register",
                value,
            })?,
            baseline,
            latched,
        },
        value => {
            return Err(SnapshotError::InvalidField {
                field: "mode",
                value,
            });
        }
    };

    Ok(state)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let (head, rest) = self
            .buf
            .split_first_chunk::<N>()
            .ok_or(SnapshotError::LengthMismatch {
                found: self.buf.len(),
                expected: N,
            })?;
        self.buf = rest;
        Ok(*head)
    }

    fn byte(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.array::<1>()?[0])
    }

    fn flag(&mut self, field: &'static str) -> Result<bool, SnapshotError> {
        match self.byte()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(SnapshotError::InvalidField { field, value }),
        }
    }

    fn flags(&mut self, field: &'static str) -> Result<[bool; 16], SnapshotError> {
        let mut flags = [false; 16];
        for flag in flags.iter_mut() {
            *flag = self.flag(field)?;
        }
        Ok(flags)
    }
}
