use crate::config::VmConfig;
use crate::error::Result;
use crate::interpreter::Interpreter;
use crate::objectmemory::ObjectMemory;
use crate::program::Program;
use log::info;

impl<'p, C> Interpreter<'p, C> {
    /// A machine for `program` with an empty heap and call stack.
    pub fn boot(program: &'p Program, config: VmConfig, console: C) -> Result<Self> {
        let memory = ObjectMemory::new(config.heap_size)?;
        info!(
            "booting: {} types, {} methods, {} byte heap, call depth {}, stack capacity {}",
            program.type_count(),
            program.method_count(),
            config.heap_size,
            config.max_call_depth,
            config.eval_stack_capacity
        );
        Ok(Interpreter {
            program,
            memory,
            strings: program.strings().clone(),
            frames: Vec::with_capacity(config.max_call_depth.min(64)),
            console,
            cycle: 0,
            config,
        })
    }
}
