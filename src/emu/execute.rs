use rand::{Rng, RngCore};

use super::{
    Chip8, Chip8Error, Chip8Result, DISPLAY_X, DISPLAY_Y, FONT_GLYPH_SIZE, FONT_START_ADDRESS,
    KeyWaitPolicy, Mode, Opcode, OpcodeALU, STACK_SIZE,
};
use crate::u4;

impl<R: RngCore> Chip8<R> {
    /// Executes one decoded instruction, including its program counter update.
    ///
    /// Every check that can fail runs before the first write, so an `Err`
    /// leaves the state untouched.
    pub(crate) fn execute(&mut self, opcode: Opcode) -> Result<Chip8Result, Chip8Error> {
        let pc = self.state.pc;
        let next = pc.wrapping_add(2);
        let skip = pc.wrapping_add(4);
        let mut result = Chip8Result::Continue;

        self.state.pc = match opcode {
            Opcode::ClearDisplay => {
                self.state.display = [[false; DISPLAY_X]; DISPLAY_Y];
                next
            }
            Opcode::Return => {
                let sp = self
                    .state
                    .sp
                    .checked_sub(1)
                    .ok_or(Chip8Error::StackUnderflow { pc })?;
                let return_address = self.state.stack[usize::from(sp) % STACK_SIZE];
                self.state.sp = sp;
                return_address.wrapping_add(2)
            }
            Opcode::Jump { nnn } => nnn,
            Opcode::JumpWithOffset { nnn } => nnn.wrapping_add(self.state.v[0].into()),
            Opcode::Call { nnn } => {
                let sp = usize::from(self.state.sp);
                if sp >= STACK_SIZE {
                    return Err(Chip8Error::StackOverflow { pc });
                }
                self.state.stack[sp] = pc;
                self.state.sp += 1;
                nnn
            }
            Opcode::SkipRegEqualImm { x, nn } => {
                if self.state.v[x] == nn { skip } else { next }
            }
            Opcode::SkipRegNotEqualImm { x, nn } => {
                if self.state.v[x] != nn { skip } else { next }
            }
            Opcode::SkipRegEqualReg { x, y } => {
                if self.state.v[x] == self.state.v[y] { skip } else { next }
            }
            Opcode::SkipRegNotEqualReg { x, y } => {
                if self.state.v[x] != self.state.v[y] { skip } else { next }
            }
            Opcode::SetRegImm { x, nn } => {
                self.state.v[x] = nn;
                next
            }
            Opcode::AddRegImm { x, nn } => {
                self.state.v[x] = self.state.v[x].wrapping_add(nn);
                next
            }
            Opcode::ALU { x, y, op } => {
                self.execute_alu(x, y, op);
                next
            }
            Opcode::Random { x, nn } => {
                let rand_byte: u8 = self.rng.random();
                self.state.v[x] = rand_byte & nn;
                next
            }
            Opcode::SetIndexImm { nnn } => {
                self.state.i = nnn;
                next
            }
            Opcode::AddIndexReg { x } => {
                self.state.i = self.state.i.wrapping_add(self.state.v[x].into());
                next
            }
            Opcode::Draw { x, y, n } => {
                result = self.execute_draw(x, y, n)?;
                next
            }
            Opcode::SkipIfPressed { x } => {
                if self.state.keypad[u4::low(self.state.v[x])] { skip } else { next }
            }
            Opcode::SkipIfNotPressed { x } => {
                if !self.state.keypad[u4::low(self.state.v[x])] { skip } else { next }
            }
            Opcode::WaitForKey { x } => {
                let (pc, wait_result) = self.execute_wait_for_key(x, pc);
                result = wait_result;
                pc
            }
            Opcode::ReadDelayTimer { x } => {
                self.state.v[x] = self.state.delay_timer;
                next
            }
            Opcode::SetDelayTimer { x } => {
                self.state.delay_timer = self.state.v[x];
                next
            }
            Opcode::SetSoundTimer { x } => {
                self.state.sound_timer = self.state.v[x];
                next
            }
            Opcode::FontChar { x } => {
                let glyph = u16::from(self.state.v[x]) * FONT_GLYPH_SIZE as u16;
                self.state.i = FONT_START_ADDRESS as u16 + glyph;
                next
            }
            Opcode::BCD { x } => {
                let value = self.state.v[x];
                let digits = [value / 100, (value / 10) % 10, value % 10];
                self.state
                    .mem_range_mut(self.state.i, digits.len())?
                    .copy_from_slice(&digits);
                next
            }
            Opcode::StoreRegs { x } => {
                let count = usize::from(x) + 1;
                let regs = self.state.v;
                self.state
                    .mem_range_mut(self.state.i, count)?
                    .copy_from_slice(&regs[..count]);
                next
            }
            Opcode::LoadRegs { x } => {
                let count = usize::from(x) + 1;
                let mut regs = [0u8; 16];
                regs[..count].copy_from_slice(self.state.mem_range(self.state.i, count)?);
                self.state.v[..count].copy_from_slice(&regs[..count]);
                next
            }
            Opcode::Unknown(opcode) => {
                log::warn!("Unknown instruction {opcode:#06X} at {pc:#06X}, skipping");
                result = Chip8Result::UnknownInstruction { opcode };
                next
            }
        };

        Ok(result)
    }

    // VF is written before the result, so when x or y is VF the result
    // is computed from the freshly written flag.
    fn execute_alu(&mut self, x: u4, y: u4, op: OpcodeALU) {
        let v = &mut self.state.v;

        match op {
            OpcodeALU::Set => v[x] = v[y],
            OpcodeALU::Or => v[x] |= v[y],
            OpcodeALU::And => v[x] &= v[y],
            OpcodeALU::Xor => v[x] ^= v[y],
            OpcodeALU::Add => {
                v[0xF] = u8::from(v[x].checked_add(v[y]).is_none());
                v[x] = v[x].wrapping_add(v[y]);
            }
            OpcodeALU::Sub => {
                v[0xF] = u8::from(v[x] >= v[y]); // Notice that borrow is inverted
                v[x] = v[x].wrapping_sub(v[y]);
            }
            OpcodeALU::SubReverse => {
                v[0xF] = u8::from(v[y] > v[x]);
                v[x] = v[y].wrapping_sub(v[x]);
            }
            OpcodeALU::ShiftRight => {
                let lsb = v[x] & 1;
                v[0xF] = lsb;
                v[x] >>= 1;
            }
            OpcodeALU::ShiftLeft => {
                let msb = (v[x] >> 7) & 1;
                v[0xF] = msb;
                v[x] <<= 1;
            }
        }
    }

    /// XORs an n-row sprite at (Vx mod 64, Vy mod 32). Pixels that fall past
    /// the right or bottom edge are clipped.
    fn execute_draw(&mut self, x: u4, y: u4, n: u4) -> Result<Chip8Result, Chip8Error> {
        let x_pos = self.state.v[x] as usize % DISPLAY_X;
        let y_pos = self.state.v[y] as usize % DISPLAY_Y;

        let rows = usize::from(n);
        let mut sprite = [0u8; 15];
        sprite[..rows].copy_from_slice(self.state.mem_range(self.state.i, rows)?);

        // Don't draw out of bounds
        let row_count = std::cmp::min(rows, DISPLAY_Y - y_pos);
        let col_count = std::cmp::min(8, DISPLAY_X - x_pos);

        let mut any_erased = false;
        for (row, &sprite_byte) in sprite.iter().take(row_count).enumerate() {
            for col in 0..col_count {
                // If current sprite bit is non-zero
                if (sprite_byte & (0x80 >> col)) != 0 {
                    let pixel = &mut self.state.display[y_pos + row][x_pos + col];

                    // Flip the pixel
                    *pixel ^= true;

                    if !*pixel {
                        any_erased = true;
                    }
                }
            }
        }

        self.state.v[0xF] = u8::from(any_erased);
        Ok(Chip8Result::Drew)
    }

    fn execute_wait_for_key(&mut self, x: u4, pc: u16) -> (u16, Chip8Result) {
        match self.config.key_wait {
            KeyWaitPolicy::Edge => {
                self.state.mode = Mode::AwaitingKey {
                    x,
                    baseline: self.state.keypad,
                    latched: [false; 16],
                };
                (pc, Chip8Result::AwaitingKey)
            }
            KeyWaitPolicy::Legacy => {
                let mut pc = pc;
                let mut result = Chip8Result::AwaitingKey;
                for key in 0..16u8 {
                    if self.state.keypad[usize::from(key)] {
                        self.state.v[x] = key;
                        pc = pc.wrapping_add(2);
                        result = Chip8Result::Continue;
                    }
                }
                (pc, result)
            }
        }
    }

    /// One cycle spent parked on Fx0A: completes on the lowest key that went
    /// down since the previous cycle, otherwise keeps waiting.
    pub(crate) fn resume_wait_for_key(
        &mut self,
        x: u4,
        baseline: [bool; 16],
        latched: [bool; 16],
    ) -> Chip8Result {
        let keypad = self.state.keypad;

        match (0..16usize).find(|&key| latched[key] || (keypad[key] && !baseline[key])) {
            Some(key) => {
                self.state.v[x] = key as u8;
                self.state.pc = self.state.pc.wrapping_add(2);
                self.state.mode = Mode::Running;
                Chip8Result::Continue
            }
            None => {
                self.state.mode = Mode::AwaitingKey {
                    x,
                    baseline: keypad,
                    latched: [false; 16],
                };
                Chip8Result::AwaitingKey
            }
        }
    }
}
