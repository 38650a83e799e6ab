use chip8_vm::{
    Chip8, Chip8Error, Chip8Result, Chip8State, Config, DISPLAY_X, DISPLAY_Y, FONT_START_ADDRESS,
    KeyWaitPolicy, u4,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

const SEED: u64 = 0xC8;

fn machine(program: &[u16]) -> Chip8<StdRng> {
    machine_with(program, Config::default())
}

fn machine_with(program: &[u16], config: Config) -> Chip8<StdRng> {
    let bytes: Vec<u8> = program.iter().flat_map(|word| word.to_be_bytes()).collect();
    let mut chip8 = Chip8::with_rng(StdRng::seed_from_u64(SEED), config);
    chip8.load_program(&bytes).unwrap();
    chip8
}

/// Runs the first instruction and returns the state before and after.
fn step(chip8: &mut Chip8<StdRng>) -> (Chip8State, Chip8State) {
    let before = chip8.state().clone();
    chip8.run_cycle().unwrap();
    (before, chip8.state().clone())
}

#[test]
fn add_with_carry_wraps_and_sets_vf() {
    let mut chip8 = machine(&[0x8014]);
    chip8.state_mut().v[0] = 0xFF;
    chip8.state_mut().v[1] = 0x01;
    chip8.run_cycle().unwrap();

    assert_eq!(chip8.state().v[0], 0x00);
    assert_eq!(chip8.state().v[0xF], 1);
    assert_eq!(chip8.state().pc, 0x202);
}

#[test]
fn add_without_carry_clears_vf() {
    let mut chip8 = machine(&[0x8014]);
    chip8.state_mut().v[0] = 0x10;
    chip8.state_mut().v[1] = 0x20;
    chip8.state_mut().v[0xF] = 1;
    chip8.run_cycle().unwrap();

    assert_eq!(chip8.state().v[0], 0x30);
    assert_eq!(chip8.state().v[0xF], 0);
}

#[test]
fn sub_with_borrow_wraps_and_clears_vf() {
    let mut chip8 = machine(&[0x8015]);
    chip8.state_mut().v[0] = 0x05;
    chip8.state_mut().v[1] = 0x0A;
    chip8.run_cycle().unwrap();

    assert_eq!(chip8.state().v[0], 0xFB);
    assert_eq!(chip8.state().v[0xF], 0);
}

#[test]
fn sub_of_equal_values_sets_vf() {
    let mut chip8 = machine(&[0x8015]);
    chip8.state_mut().v[0] = 7;
    chip8.state_mut().v[1] = 7;
    chip8.run_cycle().unwrap();

    assert_eq!(chip8.state().v[0], 0);
    assert_eq!(chip8.state().v[0xF], 1);
}

#[test]
fn subn_sets_vf_only_when_vy_is_greater() {
    let mut chip8 = machine(&[0x8017, 0x8237]);
    chip8.state_mut().v[0] = 0x03;
    chip8.state_mut().v[1] = 0x05;
    chip8.state_mut().v[2] = 0x05;
    chip8.state_mut().v[3] = 0x05;

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[0], 0x02);
    assert_eq!(chip8.state().v[0xF], 1);

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[2], 0x00);
    assert_eq!(chip8.state().v[0xF], 0);
}

#[test]
fn shifts_use_vx_and_report_shifted_bit() {
    let mut chip8 = machine(&[0x8106, 0x820E]);
    chip8.state_mut().v[1] = 0b0000_0101;
    chip8.state_mut().v[2] = 0b1000_0001;
    chip8.state_mut().v[0] = 0xFF; // Vy is ignored

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[1], 0b0000_0010);
    assert_eq!(chip8.state().v[0xF], 1);

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[2], 0b0000_0010);
    assert_eq!(chip8.state().v[0xF], 1);
}

#[test]
fn bitwise_ops_leave_vf_alone() {
    let mut chip8 = machine(&[0x8011, 0x8022, 0x8033]);
    chip8.state_mut().v[0] = 0b1100;
    chip8.state_mut().v[1] = 0b1010;
    chip8.state_mut().v[2] = 0b0110;
    chip8.state_mut().v[3] = 0b1111;
    chip8.state_mut().v[0xF] = 0x42;

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[0], 0b1110);
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[0], 0b0110);
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[0], 0b1001);
    assert_eq!(chip8.state().v[0xF], 0x42);
}

#[test]
fn add_into_vf_sees_the_carry_first() {
    let mut chip8 = machine(&[0x8F14]);
    chip8.state_mut().v[0xF] = 0xFF;
    chip8.state_mut().v[1] = 0x02;
    chip8.run_cycle().unwrap();

    // VF = carry (1), then VF = 1 + 2.
    assert_eq!(chip8.state().v[0xF], 3);
}

#[test]
fn sub_from_vf_uses_the_fresh_flag() {
    let mut chip8 = machine(&[0x80F5]);
    chip8.state_mut().v[0] = 5;
    chip8.state_mut().v[0xF] = 3;
    chip8.run_cycle().unwrap();

    // VF = (5 >= 3), then V0 = 5 - VF.
    assert_eq!(chip8.state().v[0xF], 1);
    assert_eq!(chip8.state().v[0], 4);
}

#[test]
fn shift_of_vf_shifts_the_flag() {
    let mut chip8 = machine(&[0x8FF6]);
    chip8.state_mut().v[0xF] = 0b11;
    chip8.run_cycle().unwrap();

    // VF = lsb (1), then VF >>= 1.
    assert_eq!(chip8.state().v[0xF], 0);
}

#[test]
fn draw_reads_coordinates_before_writing_vf() {
    // DRW VF, V0, 1 twice
    let mut chip8 = machine(&[0xDF01, 0xDF01]);
    chip8.state_mut().i = 0x300;
    chip8.state_mut().memory[0x300] = 0xFF;
    chip8.state_mut().v[0xF] = 8;

    chip8.run_cycle().unwrap();
    assert!(chip8.state().display[0][8..16].iter().all(|&px| px));
    assert!(chip8.state().display[0][..8].iter().all(|&px| !px));
    assert_eq!(chip8.state().v[0xF], 0);

    // VF is now 0, so the second sprite lands at column 0 without collision.
    chip8.run_cycle().unwrap();
    assert!(chip8.state().display[0][..16].iter().all(|&px| px));
    assert_eq!(chip8.state().v[0xF], 0);
}

#[test]
fn add_immediate_wraps_without_touching_vf() {
    let mut chip8 = machine(&[0x73FF]);
    chip8.state_mut().v[3] = 2;
    chip8.run_cycle().unwrap();

    assert_eq!(chip8.state().v[3], 1);
    assert_eq!(chip8.state().v[0xF], 0);
}

#[test]
fn cls_clears_a_full_display() {
    let mut chip8 = machine(&[0x00E0]);
    chip8.state_mut().display = [[true; DISPLAY_X]; DISPLAY_Y];
    chip8.run_cycle().unwrap();

    assert!(chip8.state().display.iter().flatten().all(|&px| !px));
    assert_eq!(chip8.state().pc, 0x202);
}

#[test]
fn load_index_changes_only_index_and_pc() {
    let mut chip8 = machine(&[0xA300]);
    let (before, after) = step(&mut chip8);

    let mut expected = before;
    expected.i = 0x300;
    expected.pc = 0x202;
    assert_eq!(after, expected);
}

#[test]
fn draw_sets_pixels_then_erases_with_collision() {
    let mut chip8 = machine(&[0xD011, 0xD011]);
    chip8.state_mut().i = 0x300;
    chip8.state_mut().memory[0x300] = 0xFF;

    assert_eq!(chip8.run_cycle().unwrap(), Chip8Result::Drew);
    assert!(chip8.state().display[0][..8].iter().all(|&px| px));
    assert!(!chip8.state().display[0][8]);
    assert_eq!(chip8.state().v[0xF], 0);

    chip8.run_cycle().unwrap();
    assert!(chip8.state().display[0][..8].iter().all(|&px| !px));
    assert_eq!(chip8.state().v[0xF], 1);
}

#[test]
fn draw_wraps_anchor_and_clips_overflowing_pixels() {
    let mut chip8 = machine(&[0xD012]);
    chip8.state_mut().i = 0x300;
    chip8.state_mut().memory[0x300] = 0xFF;
    chip8.state_mut().memory[0x301] = 0xFF;
    // 64 + 60 wraps to column 60, 32 + 31 wraps to row 31.
    chip8.state_mut().v[0] = 124;
    chip8.state_mut().v[1] = 63;
    chip8.run_cycle().unwrap();

    let display = &chip8.state().display;
    assert!(display[31][60..].iter().all(|&px| px));
    // Nothing wrapped around to the left edge or the top row.
    assert!(display[31][..4].iter().all(|&px| !px));
    assert!(display[0].iter().all(|&px| !px));
    assert_eq!(display.iter().flatten().filter(|&&px| px).count(), 4);
}

#[test]
fn draw_from_font_glyph() {
    // LD V0, 0x0A / LD F, V0 / DRW V1, V1, 5
    let mut chip8 = machine(&[0x600A, 0xF029, 0xD115]);
    for _ in 0..3 {
        chip8.run_cycle().unwrap();
    }

    assert_eq!(usize::from(chip8.state().i), FONT_START_ADDRESS + 5 * 0xA);
    // Glyph "A" first row is 0xF0.
    assert!(chip8.state().display[0][..4].iter().all(|&px| px));
    assert!(!chip8.state().display[0][4]);
}

#[test]
fn bcd_writes_three_digits() {
    let mut chip8 = machine(&[0xF533]);
    chip8.state_mut().v[5] = 157;
    chip8.state_mut().i = 0x400;
    chip8.run_cycle().unwrap();

    assert_eq!(&chip8.state().memory[0x400..0x403], &[1, 5, 7]);
    assert_eq!(chip8.state().i, 0x400);
}

#[test]
fn store_and_load_registers_are_inclusive() {
    let mut chip8 = machine(&[0xF255, 0xF365]);
    chip8.state_mut().v[..4].copy_from_slice(&[9, 8, 7, 6]);
    chip8.state_mut().i = 0x400;

    chip8.run_cycle().unwrap();
    assert_eq!(&chip8.state().memory[0x400..0x404], &[9, 8, 7, 0]);
    assert_eq!(chip8.state().i, 0x400);

    chip8.state_mut().memory[0x403] = 5;
    chip8.state_mut().v = [0; 16];
    chip8.run_cycle().unwrap();
    assert_eq!(&chip8.state().v[..5], &[9, 8, 7, 5, 0]);
}

#[test]
fn skips_advance_by_four_when_taken() {
    let mut chip8 = machine(&[0x3A10]);
    chip8.state_mut().v[0xA] = 0x10;
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x204);

    let mut chip8 = machine(&[0x4A10]);
    chip8.state_mut().v[0xA] = 0x10;
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x202);

    let mut chip8 = machine(&[0x5120]);
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x204);

    let mut chip8 = machine(&[0x9120]);
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x202);
}

#[test]
fn key_skips_follow_keypad() {
    let mut chip8 = machine(&[0xE19E, 0xE1A1]);
    chip8.state_mut().v[1] = 0xB;
    chip8.set_key(u4::new(0xB), true);

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x204);

    chip8.state_mut().pc = 0x202;
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x204);
}

#[test]
fn call_and_return() {
    // 0x200: CALL 0x206 / 0x202: LD V0, 1 / 0x204: JP 0x204 / 0x206: RET
    let mut chip8 = machine(&[0x2206, 0x6001, 0x1204, 0x00EE]);

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x206);
    assert_eq!(chip8.state().call_stack(), &[0x200]);

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x202);
    assert_eq!(chip8.state().sp, 0);

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[0], 1);
}

#[test]
fn jump_with_offset_adds_v0() {
    let mut chip8 = machine(&[0xB300]);
    chip8.state_mut().v[0] = 0x12;
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0x312);
}

#[test]
fn random_masks_injected_generator_output() {
    let mut chip8 = machine(&[0xC30F]);
    chip8.run_cycle().unwrap();

    let expected = StdRng::seed_from_u64(SEED).random::<u8>() & 0x0F;
    assert_eq!(chip8.state().v[3], expected);
}

#[test]
fn timers_count_down_once_per_cycle_and_stop_at_zero() {
    // LD V0, 2 / LD DT, V0 / LD ST, V0 / then a loop
    let mut chip8 = machine(&[0x6002, 0xF015, 0xF018, 0x1206]);
    chip8.run_cycle().unwrap();
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().delay_timer, 1);

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().delay_timer, 0);
    assert_eq!(chip8.state().sound_timer, 1);
    assert!(chip8.should_beep());

    chip8.run_cycle().unwrap();
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().sound_timer, 0);
    assert!(!chip8.should_beep());
}

#[test]
fn read_delay_timer_sees_value_before_tick() {
    let mut chip8 = machine(&[0xF407]);
    chip8.state_mut().delay_timer = 9;
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[4], 9);
    assert_eq!(chip8.state().delay_timer, 8);
}

#[test]
fn add_index_register() {
    let mut chip8 = machine(&[0xF21E]);
    chip8.state_mut().i = 0x0FF0;
    chip8.state_mut().v[2] = 0x20;
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().i, 0x1010);
}

#[test]
fn unknown_instruction_is_a_reported_no_op() {
    let mut chip8 = machine(&[0x0123]);
    let before = chip8.state().clone();

    assert_eq!(
        chip8.run_cycle().unwrap(),
        Chip8Result::UnknownInstruction { opcode: 0x0123 }
    );

    let mut expected = before;
    expected.pc = 0x202;
    assert_eq!(chip8.state(), &expected);
}

#[test]
fn stack_overflow_is_rejected_atomically() {
    // CALL 0x200 forever
    let mut chip8 = machine(&[0x2200]);
    chip8.state_mut().delay_timer = 100;
    for _ in 0..16 {
        chip8.run_cycle().unwrap();
    }
    assert_eq!(chip8.state().sp, 16);

    let before = chip8.state().clone();
    assert!(matches!(
        chip8.run_cycle(),
        Err(Chip8Error::StackOverflow { pc: 0x200 })
    ));
    assert_eq!(chip8.state(), &before);
}

#[test]
fn stack_underflow_is_rejected_atomically() {
    let mut chip8 = machine(&[0x00EE]);
    let before = chip8.state().clone();
    assert!(matches!(
        chip8.run_cycle(),
        Err(Chip8Error::StackUnderflow { pc: 0x200 })
    ));
    assert_eq!(chip8.state(), &before);
}

#[test]
fn memory_writes_past_end_are_rejected_atomically() {
    let mut chip8 = machine(&[0xF355]);
    chip8.state_mut().i = 0xFFE;
    let before = chip8.state().clone();

    assert!(matches!(
        chip8.run_cycle(),
        Err(Chip8Error::MemoryOutOfBounds { address: 4096 })
    ));
    assert_eq!(chip8.state(), &before);
}

#[test]
fn sprite_read_past_end_is_rejected_atomically() {
    let mut chip8 = machine(&[0xD01F]);
    chip8.state_mut().i = 0xFF8;
    let before = chip8.state().clone();

    assert!(chip8.run_cycle().is_err());
    assert_eq!(chip8.state(), &before);
}

#[test]
fn fetch_past_end_of_memory_is_rejected() {
    let mut chip8 = machine(&[0x1FFF]);
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().pc, 0xFFF);

    assert!(matches!(
        chip8.run_cycle(),
        Err(Chip8Error::ProgramCounterOutOfBounds { pc: 0xFFF })
    ));
}

#[test]
fn wait_for_key_parks_until_a_new_press() {
    // LD V2, K / LD V3, 1
    let mut chip8 = machine(&[0xF20A, 0x6301]);
    // Held before the wait starts, so it does not count.
    chip8.set_key(u4::new(4), true);
    chip8.state_mut().delay_timer = 10;

    assert_eq!(chip8.run_cycle().unwrap(), Chip8Result::AwaitingKey);
    assert!(chip8.state().is_awaiting_key());
    assert_eq!(chip8.run_cycle().unwrap(), Chip8Result::AwaitingKey);
    assert_eq!(chip8.state().pc, 0x200);
    // Timers keep running while parked.
    assert_eq!(chip8.state().delay_timer, 8);

    chip8.set_key(u4::new(9), true);
    chip8.set_key(u4::new(7), true);
    assert_eq!(chip8.run_cycle().unwrap(), Chip8Result::Continue);
    assert_eq!(chip8.state().v[2], 7);
    assert_eq!(chip8.state().pc, 0x202);
    assert!(!chip8.state().is_awaiting_key());

    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[3], 1);
}

#[test]
fn wait_for_key_accepts_a_release_then_press() {
    let mut chip8 = machine(&[0xF00A]);
    chip8.set_key(u4::new(1), true);
    chip8.run_cycle().unwrap();

    chip8.set_key(u4::new(1), false);
    chip8.run_cycle().unwrap();
    assert!(chip8.state().is_awaiting_key());

    chip8.set_key(u4::new(1), true);
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[0], 1);
    assert_eq!(chip8.state().pc, 0x202);
}

#[test]
fn wait_for_key_catches_a_tap_between_cycles() {
    let mut chip8 = machine(&[0xF50A]);
    chip8.run_cycle().unwrap();

    // Pressed and released before the next cycle runs.
    chip8.set_key(u4::new(0xE), true);
    chip8.set_key(u4::new(0xE), false);

    assert_eq!(chip8.run_cycle().unwrap(), Chip8Result::Continue);
    assert_eq!(chip8.state().v[5], 0xE);
    assert_eq!(chip8.state().pc, 0x202);
}

#[test]
fn holding_a_key_from_before_the_wait_does_not_latch() {
    let mut chip8 = machine(&[0xF50A]);
    chip8.set_key(u4::new(2), true);
    chip8.run_cycle().unwrap();

    // Repeated press events for an already held key are not new presses.
    chip8.set_key(u4::new(2), true);
    assert_eq!(chip8.run_cycle().unwrap(), Chip8Result::AwaitingKey);
    assert!(chip8.state().is_awaiting_key());
}

#[test]
fn legacy_wait_for_key_advances_once_per_held_key() {
    let config = Config::default().with_key_wait(KeyWaitPolicy::Legacy);
    let mut chip8 = machine_with(&[0xF10A], config);

    assert_eq!(chip8.run_cycle().unwrap(), Chip8Result::AwaitingKey);
    assert_eq!(chip8.state().pc, 0x200);

    chip8.set_key(u4::new(3), true);
    chip8.set_key(u4::new(5), true);
    chip8.run_cycle().unwrap();
    assert_eq!(chip8.state().v[1], 5);
    assert_eq!(chip8.state().pc, 0x204);
}

#[test]
fn save_and_load_state_round_trips() {
    let mut chip8 = machine(&[0x6005, 0x2208, 0x1204, 0x0000, 0xA3FF, 0xF00A]);
    chip8.state_mut().display[3][7] = true;
    for _ in 0..4 {
        chip8.run_cycle().unwrap();
    }
    assert!(chip8.state().is_awaiting_key());

    let saved = chip8.state().clone();
    let image = chip8.save_state();

    chip8.set_key(u4::new(2), true);
    chip8.run_cycle().unwrap();
    assert_ne!(chip8.state(), &saved);

    chip8.load_state(&image).unwrap();
    assert_eq!(chip8.state(), &saved);
}

#[test]
fn corrupt_state_leaves_machine_unchanged() {
    let mut chip8 = machine(&[0x6005]);
    chip8.run_cycle().unwrap();
    let before = chip8.state().clone();

    let mut image = chip8.save_state();
    image.truncate(100);
    assert!(matches!(
        chip8.load_state(&image),
        Err(Chip8Error::CorruptState(_))
    ));
    assert_eq!(chip8.state(), &before);
}

#[test]
fn load_program_resets_and_unload_blanks() {
    let mut chip8 = machine(&[0x6005]);
    chip8.run_cycle().unwrap();

    chip8.load_program(&[0x12, 0x00]).unwrap();
    assert_eq!(chip8.state().v[0], 0);
    assert_eq!(chip8.state().pc, 0x200);
    assert_eq!(chip8.state().memory[0x200], 0x12);

    chip8.unload_program();
    assert_eq!(chip8.state(), &Chip8State::new());
}

#[test]
fn oversized_program_is_rejected() {
    let mut chip8 = machine(&[0x6005]);
    let before = chip8.state().clone();
    assert!(matches!(
        chip8.load_program(&[0; 3585]),
        Err(Chip8Error::OversizedProgram { size: 3585, max_size: 3584 })
    ));
    assert_eq!(chip8.state(), &before);
}

#[test]
fn disassembles_memory() {
    let chip8 = machine(&[0x00E0, 0xA22A]);
    let listing: Vec<String> = chip8
        .disassemble(0x200, 2)
        .iter()
        .map(|(addr, word, op)| format!("{addr:03X} {word:04X} {op}"))
        .collect();
    assert_eq!(listing, ["200 00E0 CLS", "202 A22A LD I, 0x22A"]);

    assert_eq!(chip8.disassemble(0xFFC, 8).len(), 2);
}
