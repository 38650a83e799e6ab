use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;

use crate::{Opcode, u4};

#[derive(Parser)]
#[command(multicall = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone)]
pub enum Command {
    #[command(visible_alias = "r")]
    Run,

    #[command(visible_alias = "p")]
    Pause,

    /// Execute cycles one at a time
    #[command(visible_alias = "s")]
    Step {
        #[arg(default_value = "1")]
        count: usize,
    },

    #[command(visible_alias = "b")]
    Breakpoint {
        #[command(subcommand)]
        action: BreakpointAction,
    },

    /// Write a register, timer or the stack pointer
    Set {
        #[arg(value_parser = parse_set_target)]
        target: SetTarget,
        #[arg(value_parser = maybe_hex::<u16>)]
        value: u16,
    },

    /// Write one byte of memory
    Poke {
        #[arg(value_parser = maybe_hex::<u16>)]
        addr: u16,
        #[arg(value_parser = maybe_hex::<u8>)]
        value: u8,
    },

    #[command(visible_alias = "m")]
    Mem {
        #[arg(default_value = "0x200", value_parser = maybe_hex::<u16>)]
        start: u16,
        #[arg(default_value = "64", value_parser = maybe_hex::<u16>)]
        len: u16,
    },

    /// Disassemble from an address (defaults to the program counter)
    #[command(visible_alias = "d")]
    Disasm {
        #[arg(value_parser = maybe_hex::<u16>)]
        start: Option<u16>,
        #[arg(default_value = "8", value_parser = maybe_hex::<u16>)]
        len: u16,
    },

    /// Write a save state (defaults to the ROM path with a .c8ss extension)
    Save { path: Option<PathBuf> },

    /// Restore a save state (defaults to the ROM path with a .c8ss extension)
    Load { path: Option<PathBuf> },

    /// Reload the current ROM
    Reset,

    /// Unload the ROM, leaving a blank machine
    Eject,

    #[command(visible_alias = "q")]
    Quit,
}

pub enum CommandResult {
    Ok,
    Breakpoints(Vec<u16>),
    MemDump { data: Vec<u8>, offset: u16 },
    Disasm { instructions: Vec<(u16, u16, Opcode)> },
    Saved(PathBuf),
    Loaded(PathBuf),
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Error while executing cpu instruction: {0}")]
    Chip8Error(#[from] crate::Chip8Error),
    #[error("Save state file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Value {value:#X} out of range, max is {max:#X}")]
    ValueOutOfRange { value: u16, max: u16 },
}

#[derive(Subcommand, Clone)]
pub enum BreakpointAction {
    #[command(visible_alias = "s")]
    Set {
        #[arg(value_parser = maybe_hex::<u16>)]
        addr: u16,
    },

    #[command(visible_alias = "c")]
    Clear {
        #[arg(value_parser = maybe_hex::<u16>)]
        addr: u16,
    },

    #[command(visible_alias = "l")]
    List,

    #[command(visible_alias = "ca")]
    ClearAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetTarget {
    V(u4),
    I,
    Pc,
    Dt,
    St,
    Sp,
}

fn parse_set_target(s: &str) -> Result<SetTarget, String> {
    let lower = s.to_lowercase();

    match lower.as_str() {
        "index" | "i" => Ok(SetTarget::I),
        "pc" => Ok(SetTarget::Pc),
        "dt" | "delay" => Ok(SetTarget::Dt),
        "st" | "sound" => Ok(SetTarget::St),
        "sp" => Ok(SetTarget::Sp),

        _ if lower.starts_with('v') => {
            let hex_str = &lower[1..];
            match u8::from_str_radix(hex_str, 16) {
                Ok(val) if val < 16 => Ok(SetTarget::V(u4::new(val))),
                _ => Err(format!("Invalid register: '{}'", s)),
            }
        }

        _ => Err(format!("Unknown set target: '{}'", s)),
    }
}
