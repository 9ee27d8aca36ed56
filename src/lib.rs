//! A bytecode virtual machine for a small statically typed, class-based language.
//!
//! A front end produces an `Image`; the `loader` resolves it into a `Program` of live
//! descriptors; an `Interpreter` runs the program against an `ObjectMemory` and a
//! `Console`.

pub mod config;
pub mod error;
pub mod image;
pub mod interpreter;
pub mod loader;
pub mod objectmemory;
pub mod opcode;
pub mod program;
pub mod strings;
pub mod value;

pub use crate::config::VmConfig;
pub use crate::error::{Result, VmError};
pub use crate::interpreter::{Console, ExitStatus, Interpreter, StreamConsole};
pub use crate::program::Program;

/// Resolve `image` and run its entry point on a fresh machine.
pub fn run<C: Console>(image: &image::Image, config: VmConfig, console: C) -> Result<ExitStatus> {
    let program = loader::load(image)?;
    let mut interpreter = Interpreter::boot(&program, config, console)?;
    interpreter.run_main()
}
