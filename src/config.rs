use clap::Args;

pub const DEFAULT_HEAP_SIZE: usize = 1 << 20;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;
pub const DEFAULT_EVAL_STACK_CAPACITY: usize = 256;

/// Fixed resource limits of one machine.
#[derive(Args, Clone, Debug, Eq, PartialEq)]
pub struct VmConfig {
    /// Size of the object heap in bytes
    #[arg(long, default_value_t = DEFAULT_HEAP_SIZE)]
    pub heap_size: usize,

    /// Maximum number of nested activation frames
    #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    pub max_call_depth: usize,

    /// Capacity of each frame's evaluation stack
    #[arg(long = "stack-capacity", default_value_t = DEFAULT_EVAL_STACK_CAPACITY)]
    pub eval_stack_capacity: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            heap_size: DEFAULT_HEAP_SIZE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            eval_stack_capacity: DEFAULT_EVAL_STACK_CAPACITY,
        }
    }
}
