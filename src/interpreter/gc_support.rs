use crate::error::{Result, VmError};
use crate::interpreter::Interpreter;
use crate::objectmemory::{Addr, GcReport};
use crate::program::TypeRef;

impl<'p, C> Interpreter<'p, C> {
    /// Every address held by a live frame, innermost frame last.
    pub fn roots(&self) -> Vec<Addr> {
        self.frames.iter().flat_map(|frame| frame.roots()).collect()
    }

    pub fn collect_garbage(&mut self) -> Result<GcReport> {
        let roots = self.roots();
        self.memory.collect(self.program, roots)
    }

    /// Allocate an instance of the class `ty`, collecting once if the heap is full.
    pub(super) fn allocate_object(&mut self, ty: TypeRef) -> Result<Addr> {
        let program = self.program;
        let class = program
            .class(ty)
            .ok_or_else(|| VmError::bytecode(format!("{:?} is not a class", ty)))?;
        if let Some(addr) = self.memory.instantiate_class(ty, class) {
            return Ok(addr);
        }
        self.collect_garbage()?;
        self.memory.instantiate_class(ty, class).ok_or_else(|| {
            VmError::exhausted(format!(
                "heap exhausted allocating {} ({} bytes free)",
                program.type_name(ty),
                self.memory.free_bytes()
            ))
        })
    }

    pub(super) fn allocate_array(&mut self, ty: TypeRef, length: u32) -> Result<Addr> {
        let program = self.program;
        let array = program
            .array(ty)
            .ok_or_else(|| VmError::bytecode(format!("{:?} is not an array type", ty)))?;
        if let Some(addr) = self.memory.instantiate_array(ty, array, length) {
            return Ok(addr);
        }
        self.collect_garbage()?;
        self.memory.instantiate_array(ty, array, length).ok_or_else(|| {
            VmError::exhausted(format!(
                "heap exhausted allocating {}[{}] ({} bytes free)",
                program.type_name(array.element),
                length,
                self.memory.free_bytes()
            ))
        })
    }
}
