use crate::error::{Result, VmError};
use crate::objectmemory::Addr;
use crate::program::{MethodRef, Program};
use crate::value::{Value, ValueKind};

/// One activation: the method being run, its receiver, argument and local slots, a
/// private bounded evaluation stack and the index of the next instruction.
#[derive(Clone, Debug)]
pub struct Frame {
    pub method: MethodRef,
    pub receiver: Addr,
    pub args: Vec<Value>,
    pub locals: Vec<Value>,
    pub ip: usize,
    stack: Vec<Value>,
    capacity: usize,
}

impl Frame {
    pub fn new(
        program: &Program,
        method: MethodRef,
        receiver: Addr,
        args: Vec<Value>,
        capacity: usize,
    ) -> Self {
        let locals = program
            .method(method)
            .locals
            .iter()
            .map(|&ty| program.value_kind(ty).default_value())
            .collect();
        Frame {
            method,
            receiver,
            args,
            locals,
            ip: 0,
            stack: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= self.capacity {
            return Err(VmError::exhausted(format!(
                "evaluation stack full ({} entries)",
                self.capacity
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::bytecode("evaluation stack underflow"))
    }

    pub fn top(&self) -> Result<Value> {
        self.stack
            .last()
            .cloned()
            .ok_or_else(|| VmError::bytecode("evaluation stack underflow"))
    }

    /// Pop a value that must be of `kind`.
    pub fn pop_kind(&mut self, kind: ValueKind) -> Result<Value> {
        let value = self.pop()?;
        check_kind(value, kind)?;
        Ok(value)
    }

    pub fn pop_int(&mut self) -> Result<i32> {
        match self.pop_kind(ValueKind::Int)? {
            Value::Int(i) => Ok(i),
            _ => unreachable!(),
        }
    }

    pub fn pop_bool(&mut self) -> Result<bool> {
        match self.pop_kind(ValueKind::Bool)? {
            Value::Bool(b) => Ok(b),
            _ => unreachable!(),
        }
    }

    pub fn pop_char(&mut self) -> Result<char> {
        match self.pop_kind(ValueKind::Char)? {
            Value::Char(c) => Ok(c),
            _ => unreachable!(),
        }
    }

    pub fn pop_ref(&mut self) -> Result<Addr> {
        match self.pop_kind(ValueKind::Ref)? {
            Value::Ref(addr) => Ok(addr),
            _ => unreachable!(),
        }
    }

    /// Every heap address this frame keeps alive.
    pub fn roots<'a>(&'a self) -> impl Iterator<Item = Addr> + 'a {
        let receiver = if self.receiver.is_null() {
            None
        } else {
            Some(self.receiver)
        };
        receiver.into_iter().chain(
            self.args
                .iter()
                .chain(self.locals.iter())
                .chain(self.stack.iter())
                .filter_map(|value| value.as_root()),
        )
    }
}

pub fn check_kind(value: Value, kind: ValueKind) -> Result<()> {
    if value.kind() != kind {
        return Err(VmError::bytecode(format!(
            "expected {}, found {}",
            kind,
            value.kind()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::StrRef;
    use crate::image::text_format::TextFormat;
    use crate::loader;

    fn program() -> Program {
        let source = r#"
!Class: Box fields: -3!
!Method: Main locals: -3 -1 -2 -4 0!
    ret
!Main: 0!
"#;
        loader::load(&TextFormat::parse(source).unwrap()).unwrap()
    }

    #[test]
    fn locals_start_at_their_defaults() {
        let program = program();
        let frame = Frame::new(&program, program.entry(), Addr::NULL, Vec::new(), 4);
        assert_eq!(
            frame.locals,
            vec![
                Value::Int(0),
                Value::Bool(false),
                Value::Char('\0'),
                Value::Str(StrRef::EMPTY),
                Value::Ref(Addr::NULL),
            ]
        );
    }

    #[test]
    fn stack_is_bounded_and_tag_checked() {
        let program = program();
        let mut frame = Frame::new(&program, program.entry(), Addr::NULL, Vec::new(), 2);
        frame.push(Value::Int(1)).unwrap();
        frame.push(Value::Bool(true)).unwrap();
        assert!(matches!(
            frame.push(Value::Int(3)),
            Err(VmError::ResourceExhausted(_))
        ));
        assert!(matches!(frame.pop_int(), Err(VmError::BytecodeInvalid(_))));
        assert_eq!(frame.pop_int().unwrap(), 1);
        assert!(matches!(frame.pop(), Err(VmError::BytecodeInvalid(_))));
    }

    #[test]
    fn roots_cover_receiver_slots_and_stack() {
        let program = program();
        let mut frame = Frame::new(
            &program,
            program.entry(),
            Addr(8),
            vec![Value::Ref(Addr(24)), Value::Int(24)],
            4,
        );
        frame.locals[4] = Value::Ref(Addr(40));
        frame.push(Value::Ref(Addr(56))).unwrap();
        frame.push(Value::Ref(Addr::NULL)).unwrap();
        let roots: Vec<Addr> = frame.roots().collect();
        assert_eq!(roots, vec![Addr(8), Addr(24), Addr(40), Addr(56)]);
    }
}
