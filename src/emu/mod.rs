mod chip8;
mod config;
mod execute;
mod font;
mod opcode;
mod runner;
pub mod snapshot;
mod state;
mod types;

pub use chip8::*;
pub use config::*;
pub use font::*;
pub use opcode::*;
pub use runner::*;
pub use state::*;
pub use types::*;
