//! The execution engine: a fetch-decode-execute loop over a stack of activation frames.

use crate::config::VmConfig;
use crate::error::{Result, VmError};
use crate::objectmemory::{Addr, ObjectMemory};
use crate::opcode::Opcode;
use crate::program::{Builtin, Instruction, MethodRef, Operand, Program, TypeRef};
use crate::strings::{StrRef, StringTable};
use crate::value::{Value, ValueKind};
use log::{debug, error, log_enabled, trace, Level};

pub mod console;
mod frame;
mod gc_support;
mod startup;

pub use self::console::{Console, ConsoleValue, StreamConsole};
pub use self::frame::Frame;

use self::frame::check_kind;

/// How a run ended when it did not fail.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ExitStatus {
    /// The entry method returned.
    Completed,
    /// `Halt` was called with this message.
    Halted(String),
}

pub struct Interpreter<'p, C> {
    program: &'p Program,
    config: VmConfig,
    memory: ObjectMemory,
    // Program literals plus everything read at run time.
    strings: StringTable,
    frames: Vec<Frame>,
    console: C,

    cycle: usize,
}

impl<'p, C> Interpreter<'p, C> {
    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn memory(&self) -> &ObjectMemory {
        &self.memory
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn cycles(&self) -> usize {
        self.cycle
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn into_console(self) -> C {
        self.console
    }

    pub fn string(&self, s: StrRef) -> Result<&str> {
        self.strings
            .get(s)
            .ok_or_else(|| VmError::bytecode(format!("unknown string {:?}", s)))
    }

    fn frame(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| VmError::bytecode("no active frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::bytecode("no active frame"))
    }

    fn push(&mut self, value: Value) -> Result<()> {
        self.frame_mut()?.push(value)
    }

    fn backtrace(&self) {
        for frame in self.frames.iter().rev() {
            let receiver = if frame.receiver.is_null() {
                String::new()
            } else {
                format!(" (this = {:?})", frame.receiver)
            };
            error!(
                "\t{} @ {}{}",
                self.program.method_name(frame.method),
                frame.ip.saturating_sub(1),
                receiver
            );
        }
    }
}

/// The actual interpreter
impl<'p, C: Console> Interpreter<'p, C> {
    /// Run the program's entry point to completion.
    pub fn run_main(&mut self) -> Result<ExitStatus> {
        self.run(self.program.entry())
    }

    /// Set up a fresh call stack whose only frame is `entry`, which must take no
    /// arguments. Nothing runs until `cycle` or `run` is called.
    pub fn start(&mut self, entry: MethodRef) -> Result<()> {
        if entry.index() >= self.program.method_count() {
            return Err(VmError::bytecode(format!("no method {:?}", entry)));
        }
        let desc = self.program.method(entry);
        if desc.builtin.is_some() || !desc.params.is_empty() {
            return Err(VmError::bytecode(format!(
                "{} cannot be an entry point",
                self.program.method_name(entry)
            )));
        }
        debug!("[cycle={}] START {}", self.cycle, self.program.method_name(entry));
        self.frames.clear();
        self.frames.push(Frame::new(
            self.program,
            entry,
            Addr::NULL,
            Vec::new(),
            self.config.eval_stack_capacity,
        ));
        Ok(())
    }

    /// Run `entry` until the call stack empties or the program halts. On failure the call
    /// stack is logged and abandoned.
    pub fn run(&mut self, entry: MethodRef) -> Result<ExitStatus> {
        self.start(entry)?;
        let outcome = self.interpret();
        if let Err(err) = &outcome {
            error!("fatal: {}", err);
            self.backtrace();
        }
        self.frames.clear();
        outcome
    }

    fn interpret(&mut self) -> Result<ExitStatus> {
        while !self.frames.is_empty() {
            if let Some(status) = self.cycle()? {
                return Ok(status);
            }
        }
        Ok(ExitStatus::Completed)
    }

    /// Execute one instruction.
    pub fn cycle(&mut self) -> Result<Option<ExitStatus>> {
        let program = self.program;
        let frame = self.frame_mut()?;
        let code = &program.method(frame.method).code;
        let insn = *code.get(frame.ip).ok_or_else(|| {
            VmError::bytecode(format!(
                "{} ran off the end of its code",
                program.method_name(frame.method)
            ))
        })?;
        frame.ip += 1;
        self.cycle += 1;

        if log_enabled!(Level::Trace) {
            let frame = self.frame()?;
            trace!(
                "[cycle={}] {:depth$} {} @ {}: {:?} {:?}",
                self.cycle,
                "",
                program.method_name(frame.method),
                frame.ip - 1,
                insn.opcode,
                insn.operand,
                depth = self.frames.len()
            );
        }
        self.dispatch(insn)
    }

    fn dispatch(&mut self, insn: Instruction) -> Result<Option<ExitStatus>> {
        let program = self.program;
        match (insn.opcode, insn.operand) {
            (Opcode::Nop, _) => {}

            // Constants
            (Opcode::LdcI4, Operand::Int(i)) => self.push(Value::Int(i))?,
            (Opcode::LdcC, Operand::Char(c)) => self.push(Value::Char(c))?,
            (Opcode::LdcB, Operand::Bool(b)) => self.push(Value::Bool(b))?,
            (Opcode::LdStr, Operand::Str(s)) => self.push(Value::Str(s))?,
            (Opcode::LdNull, _) => self.push(Value::Ref(Addr::NULL))?,

            // Slots
            (Opcode::LdLoc, Operand::Slot(i)) => {
                let frame = self.frame_mut()?;
                let value = slot(&frame.locals, i)?;
                frame.push(value)?;
            }
            (Opcode::StLoc, Operand::Slot(i)) => {
                let frame = self.frame_mut()?;
                let value = frame.pop()?;
                store_slot(&mut frame.locals, i, value)?;
            }
            (Opcode::LdArg, Operand::Slot(i)) => {
                let frame = self.frame_mut()?;
                let value = slot(&frame.args, i)?;
                frame.push(value)?;
            }
            (Opcode::StArg, Operand::Slot(i)) => {
                let frame = self.frame_mut()?;
                let value = frame.pop()?;
                store_slot(&mut frame.args, i, value)?;
            }
            (Opcode::LdThis, _) => {
                let frame = self.frame_mut()?;
                if frame.receiver.is_null() {
                    return Err(VmError::null("ldthis without a receiver"));
                }
                let receiver = frame.receiver;
                frame.push(Value::Ref(receiver))?;
            }

            // Objects and arrays
            (Opcode::LdFld, Operand::Field(field)) => {
                let obj = self.frame_mut()?.pop_ref()?;
                self.check_instance(obj, field.class, "ldfld")?;
                let value = self.memory.get_field(obj, &field.slot)?;
                self.push(value)?;
            }
            (Opcode::StFld, Operand::Field(field)) => {
                let frame = self.frame_mut()?;
                let value = frame.pop_kind(field.slot.kind)?;
                let obj = frame.pop_ref()?;
                self.check_instance(obj, field.class, "stfld")?;
                self.memory.put_field(obj, &field.slot, value)?;
            }
            (Opcode::NewObj, Operand::Type(ty)) => {
                let obj = self.allocate_object(ty)?;
                self.push(Value::Ref(obj))?;
            }
            (Opcode::NewArr, Operand::Type(ty)) => {
                let length = self.frame_mut()?.pop_int()?;
                if length < 0 {
                    return Err(VmError::IndexOutOfRange { index: length, length: 0 });
                }
                let array = self.allocate_array(ty, length as u32)?;
                self.push(Value::Ref(array))?;
            }
            (Opcode::LdElem, _) => {
                let frame = self.frame_mut()?;
                let index = frame.pop_int()?;
                let array = frame.pop_ref()?;
                let kind = self.element_kind(array, "ldelem")?;
                let value = self.memory.get_element(array, kind, index)?;
                self.push(value)?;
            }
            (Opcode::StElem, _) => {
                let frame = self.frame_mut()?;
                let value = frame.pop()?;
                let index = frame.pop_int()?;
                let array = frame.pop_ref()?;
                let kind = self.element_kind(array, "stelem")?;
                check_kind(value, kind)?;
                self.memory.put_element(array, kind, index, value)?;
            }
            (Opcode::LdLen, _) => {
                let array = self.frame_mut()?.pop_ref()?;
                self.element_kind(array, "ldlen")?;
                let length = self.memory.array_length(array)?;
                self.push(Value::Int(length as i32))?;
            }

            // Calls
            (Opcode::Call, Operand::Method(method)) => return self.call(method, false),
            (Opcode::CallVirt, Operand::Method(method)) => return self.call(method, true),
            (Opcode::Ret, _) => self.return_from_method()?,

            // Type tests
            (Opcode::IsInst, Operand::Type(ty)) => {
                let obj = self.frame_mut()?.pop_ref()?;
                let is = !obj.is_null() && program.is_subclass_of(self.memory.type_of(obj)?, ty);
                self.push(Value::Bool(is))?;
            }
            (Opcode::CastClass, Operand::Type(ty)) => {
                let obj = self.frame_mut()?.pop_ref()?;
                if !obj.is_null() {
                    let actual = self.memory.type_of(obj)?;
                    if !program.is_subclass_of(actual, ty) {
                        return Err(VmError::InvalidCast {
                            from: program.type_name(actual),
                            to: program.type_name(ty),
                        });
                    }
                }
                self.push(Value::Ref(obj))?;
            }

            // Branches
            (Opcode::Br, Operand::Branch(offset)) => self.jump(offset)?,
            (Opcode::BrTrue, Operand::Branch(offset)) => {
                if self.frame_mut()?.pop_bool()? {
                    self.jump(offset)?;
                }
            }
            (Opcode::BrFalse, Operand::Branch(offset)) => {
                if !self.frame_mut()?.pop_bool()? {
                    self.jump(offset)?;
                }
            }

            // Arithmetic
            (Opcode::Add, _) => self.arith(|a, b| Ok(a.wrapping_add(b)))?,
            (Opcode::Sub, _) => self.arith(|a, b| Ok(a.wrapping_sub(b)))?,
            (Opcode::Mul, _) => self.arith(|a, b| Ok(a.wrapping_mul(b)))?,
            (Opcode::Div, _) => self.arith(|a, b| {
                if b == 0 {
                    Err(VmError::DivideByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            (Opcode::Rem, _) => self.arith(|a, b| {
                if b == 0 {
                    Err(VmError::DivideByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            (Opcode::Neg, _) => {
                let frame = self.frame_mut()?;
                let a = frame.pop_int()?;
                frame.push(Value::Int(a.wrapping_neg()))?;
            }

            // Comparison
            (Opcode::Ceq, _) => self.equality(true)?,
            (Opcode::Cne, _) => self.equality(false)?,
            (Opcode::Clt, _) => self.compare(|o| o.is_lt())?,
            (Opcode::Cle, _) => self.compare(|o| o.is_le())?,
            (Opcode::Cgt, _) => self.compare(|o| o.is_gt())?,
            (Opcode::Cge, _) => self.compare(|o| o.is_ge())?,

            // Logic
            (Opcode::And, _) => {
                let frame = self.frame_mut()?;
                let b = frame.pop_bool()?;
                let a = frame.pop_bool()?;
                frame.push(Value::Bool(a && b))?;
            }
            (Opcode::Or, _) => {
                let frame = self.frame_mut()?;
                let b = frame.pop_bool()?;
                let a = frame.pop_bool()?;
                frame.push(Value::Bool(a || b))?;
            }
            (Opcode::Not, _) => {
                let frame = self.frame_mut()?;
                let a = frame.pop_bool()?;
                frame.push(Value::Bool(!a))?;
            }

            // Conversion
            (Opcode::ConvC, _) => {
                let frame = self.frame_mut()?;
                let i = frame.pop_int()?;
                let c = std::char::from_u32(i as u32).ok_or_else(|| VmError::InvalidCast {
                    from: format!("int {}", i),
                    to: "char".to_owned(),
                })?;
                frame.push(Value::Char(c))?;
            }
            (Opcode::ConvI, _) => {
                let frame = self.frame_mut()?;
                let c = frame.pop_char()?;
                frame.push(Value::Int(c as i32))?;
            }

            // Stack
            (Opcode::Pop, _) => {
                self.frame_mut()?.pop()?;
            }
            (Opcode::Dup, _) => {
                let frame = self.frame_mut()?;
                let top = frame.top()?;
                frame.push(top)?;
            }

            (opcode, operand) => {
                return Err(VmError::bytecode(format!(
                    "{} cannot take operand {:?}",
                    opcode, operand
                )))
            }
        }
        Ok(None)
    }

    fn jump(&mut self, offset: isize) -> Result<()> {
        let frame = self.frame_mut()?;
        let target = frame.ip as isize + offset;
        if target < 0 {
            return Err(VmError::bytecode(format!("branch to {}", target)));
        }
        frame.ip = target as usize;
        Ok(())
    }

    fn arith<F>(&mut self, op: F) -> Result<()>
    where
        F: FnOnce(i32, i32) -> Result<i32>,
    {
        let frame = self.frame_mut()?;
        let b = frame.pop_int()?;
        let a = frame.pop_int()?;
        frame.push(Value::Int(op(a, b)?))
    }

    /// Same-kind equality. Interned strings are equal exactly when their indices are, and
    /// references compare by identity.
    fn equality(&mut self, equal: bool) -> Result<()> {
        let frame = self.frame_mut()?;
        let b = frame.pop()?;
        let a = frame.pop()?;
        check_kind(b, a.kind())?;
        frame.push(Value::Bool((a == b) == equal))
    }

    fn compare<F>(&mut self, test: F) -> Result<()>
    where
        F: FnOnce(std::cmp::Ordering) -> bool,
    {
        let frame = self.frame_mut()?;
        let b = frame.pop()?;
        let a = frame.pop()?;
        let ordering = match (a, b) {
            (Value::Int(a), Value::Int(b)) => a.cmp(&b),
            (Value::Char(a), Value::Char(b)) => a.cmp(&b),
            _ => {
                return Err(VmError::bytecode(format!(
                    "cannot order {} and {}",
                    a.kind(),
                    b.kind()
                )))
            }
        };
        frame.push(Value::Bool(test(ordering)))
    }

    /// `obj` must be a live instance of `class` or one of its descendants.
    fn check_instance(&self, obj: Addr, class: TypeRef, what: &str) -> Result<()> {
        if obj.is_null() {
            return Err(VmError::null(format!("{} on null", what)));
        }
        let actual = self.memory.type_of(obj)?;
        if !self.program.is_subclass_of(actual, class) {
            return Err(VmError::bytecode(format!(
                "{} of {} on an instance of {}",
                what,
                self.program.type_name(class),
                self.program.type_name(actual)
            )));
        }
        Ok(())
    }

    /// The element kind of the array at `array`.
    fn element_kind(&self, array: Addr, what: &str) -> Result<ValueKind> {
        if array.is_null() {
            return Err(VmError::null(format!("{} on null", what)));
        }
        let ty = self.memory.type_of(array)?;
        self.program
            .array(ty)
            .map(|desc| desc.element_kind)
            .ok_or_else(|| {
                VmError::bytecode(format!(
                    "{} on an instance of {}",
                    what,
                    self.program.type_name(ty)
                ))
            })
    }
}

// Calls and returns
impl<'p, C: Console> Interpreter<'p, C> {
    fn call(&mut self, method: MethodRef, virtual_call: bool) -> Result<Option<ExitStatus>> {
        let program = self.program;
        let desc = program.method(method);
        let capacity = self.config.eval_stack_capacity;

        let frame = self.frame_mut()?;
        let mut args = Vec::with_capacity(desc.params.len());
        for &param in desc.params.iter().rev() {
            args.push(frame.pop_kind(program.value_kind(param))?);
        }
        args.reverse();

        let receiver = if desc.is_instance() {
            let receiver = frame.pop_ref()?;
            if receiver.is_null() {
                return Err(VmError::null(format!(
                    "call to {} on null",
                    program.method_name(method)
                )));
            }
            receiver
        } else if virtual_call {
            return Err(VmError::bytecode(format!(
                "callvirt to {}, which has no receiver",
                program.method_name(method)
            )));
        } else {
            Addr::NULL
        };
        if let Some(owner) = desc.owner {
            let class = self.memory.type_of(receiver)?;
            if !program.is_subclass_of(class, owner) {
                return Err(VmError::bytecode(format!(
                    "{} called on an instance of {}",
                    program.method_name(method),
                    program.type_name(class)
                )));
            }
        }

        let target = if virtual_call {
            let class = self.memory.type_of(receiver)?;
            let target = program.resolve_virtual(class, &desc.name).ok_or_else(|| {
                VmError::bytecode(format!(
                    "{} has no slot for {}",
                    program.type_name(class),
                    desc.name
                ))
            })?;
            if program.method(target).params.len() != args.len() {
                return Err(VmError::bytecode(format!(
                    "{} does not take {} arguments",
                    program.method_name(target),
                    args.len()
                )));
            }
            target
        } else {
            method
        };

        if let Some(builtin) = program.method(target).builtin {
            return self.call_builtin(builtin, &args);
        }

        if self.frames.len() >= self.config.max_call_depth {
            return Err(VmError::exhausted(format!(
                "call depth exceeds {}",
                self.config.max_call_depth
            )));
        }
        debug!(
            "[cycle={}] {:depth$} CALL {}",
            self.cycle,
            "",
            program.method_name(target),
            depth = self.frames.len()
        );
        self.frames
            .push(Frame::new(program, target, receiver, args, capacity));
        Ok(None)
    }

    fn return_from_method(&mut self) -> Result<()> {
        let program = self.program;
        let frame = self.frame_mut()?;
        let value = match program.method(frame.method).return_type {
            Some(ty) => Some(frame.pop_kind(program.value_kind(ty))?),
            None => None,
        };
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::bytecode("return without a frame"))?;
        debug!(
            "[cycle={}] {:depth$} RETN {} {:?}",
            self.cycle,
            "",
            program.method_name(frame.method),
            value,
            depth = self.frames.len()
        );
        if let (Some(value), Some(caller)) = (value, self.frames.last_mut()) {
            caller.push(value)?;
        }
        Ok(())
    }

    fn call_builtin(&mut self, builtin: Builtin, args: &[Value]) -> Result<Option<ExitStatus>> {
        debug!(
            "[cycle={}] {:depth$} PRIM {} {:?}",
            self.cycle,
            "",
            builtin.name(),
            args,
            depth = self.frames.len()
        );
        match (builtin, args) {
            (Builtin::Halt, &[Value::Str(msg)]) => {
                return Ok(Some(ExitStatus::Halted(self.string(msg)?.to_owned())));
            }
            (Builtin::WriteChar, &[Value::Char(c)]) => {
                self.console.write(ConsoleValue::Char(c))?;
            }
            (Builtin::WriteInt, &[Value::Int(i)]) => {
                self.console.write(ConsoleValue::Int(i))?;
            }
            (Builtin::WriteString, &[Value::Str(s)]) => {
                let text = self
                    .strings
                    .get(s)
                    .ok_or_else(|| VmError::bytecode(format!("unknown string {:?}", s)))?;
                self.console.write(ConsoleValue::Str(text))?;
            }
            (Builtin::ReadChar, &[]) => {
                let c = self.console.read_char()?;
                self.push(Value::Char(c))?;
            }
            (Builtin::ReadInt, &[]) => {
                let i = self.console.read_int()?;
                self.push(Value::Int(i))?;
            }
            (Builtin::ReadString, &[]) => {
                let line = self.console.read_line()?;
                let s = self.strings.intern(&line);
                self.push(Value::Str(s))?;
            }
            (builtin, args) => {
                return Err(VmError::bytecode(format!(
                    "{} called with {:?}",
                    builtin.name(),
                    args
                )))
            }
        }
        Ok(None)
    }
}

fn slot(slots: &[Value], index: usize) -> Result<Value> {
    slots
        .get(index)
        .cloned()
        .ok_or_else(|| VmError::bytecode(format!("no slot {}", index)))
}

fn store_slot(slots: &mut [Value], index: usize, value: Value) -> Result<()> {
    let slot = slots
        .get_mut(index)
        .ok_or_else(|| VmError::bytecode(format!("no slot {}", index)))?;
    check_kind(value, slot.kind())?;
    *slot = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::text_format::TextFormat;
    use crate::loader;

    type TestConsole = StreamConsole<&'static [u8], Vec<u8>>;

    fn load(source: &str) -> Program {
        loader::load(&TextFormat::parse(source).unwrap()).unwrap()
    }

    fn run_with(program: &Program, config: VmConfig) -> (Result<ExitStatus>, String) {
        let console = StreamConsole::new(&b""[..], Vec::new());
        let mut interp: Interpreter<TestConsole> =
            Interpreter::boot(program, config, console).unwrap();
        let result = interp.run_main();
        let (_, out) = interp.into_console().into_inner();
        (result, String::from_utf8(out).unwrap())
    }

    fn run(source: &str) -> (Result<ExitStatus>, String) {
        run_with(&load(source), VmConfig::default())
    }

    #[test]
    fn arithmetic_wraps_and_divides_toward_zero() {
        let (result, out) = run(r#"
!Method: Main!
    ldc_i4 2147483647
    ldc_i4 1
    add
    call -3
    ldc_c ' '
    call -2
    ldc_i4 -7
    ldc_i4 2
    div
    call -3
    ldc_c ' '
    call -2
    ldc_i4 -7
    ldc_i4 2
    rem
    call -3
    ret
!Main: 0!
"#);
        assert_eq!(result.unwrap(), ExitStatus::Completed);
        assert_eq!(out, "-2147483648 -3 -1");
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let (result, _) = run(r#"
!Method: Main!
    ldc_i4 1
    ldc_i4 0
    div
    pop
    ret
!Main: 0!
"#);
        assert!(matches!(result, Err(VmError::DivideByZero)));
    }

    #[test]
    fn comparisons_and_logic() {
        let (result, out) = run(r#"
!Method: Main!
    ldc_c 'a'
    ldc_c 'b'
    clt
    ldc_i4 3
    ldc_i4 3
    cge
    and
    ldstr "x"
    ldstr "x"
    ceq
    and
    not
    brtrue :bad
    ldc_i4 1
    call -3
    ret
:bad
    ldc_i4 0
    call -3
    ret
!Main: 0!
"#);
        assert_eq!(result.unwrap(), ExitStatus::Completed);
        assert_eq!(out, "1");
    }

    #[test]
    fn conversions_between_int_and_char() {
        let (result, out) = run(r#"
!Method: Main!
    ldc_c 'A'
    conv_i
    ldc_i4 2
    add
    conv_c
    call -2
    ret
!Main: 0!
"#);
        assert_eq!(result.unwrap(), ExitStatus::Completed);
        assert_eq!(out, "C");
    }

    #[test]
    fn halt_reports_its_message() {
        let (result, out) = run(r#"
!Method: Main!
    ldstr "before"
    call -4
    ldstr "stopped"
    call -1
    ldstr "after"
    call -4
    ret
!Main: 0!
"#);
        assert_eq!(result.unwrap(), ExitStatus::Halted("stopped".to_owned()));
        assert_eq!(out, "before");
    }

    #[test]
    fn mistyped_operands_are_bytecode_errors() {
        let (result, _) = run(r#"
!Method: Main!
    ldc_b true
    ldc_i4 1
    add
    ret
!Main: 0!
"#);
        assert!(matches!(result, Err(VmError::BytecodeInvalid(_))));

        let (result, _) = run(r#"
!Method: Main locals: -3!
    ldstr "s"
    stloc 0
    ret
!Main: 0!
"#);
        assert!(matches!(result, Err(VmError::BytecodeInvalid(_))));
    }

    #[test]
    fn running_off_the_end_is_an_error() {
        let (result, _) = run(r#"
!Method: Main!
    nop
!Main: 0!
"#);
        assert!(matches!(result, Err(VmError::BytecodeInvalid(_))));
    }

    #[test]
    fn eval_stack_is_bounded() {
        let program = load(r#"
!Method: Main!
:top
    ldc_i4 1
    br :top
!Main: 0!
"#);
        let config = VmConfig {
            eval_stack_capacity: 16,
            ..VmConfig::default()
        };
        let (result, _) = run_with(&program, config);
        assert!(matches!(result, Err(VmError::ResourceExhausted(_))));
    }

    #[test]
    fn field_access_through_null_is_fatal() {
        let (result, _) = run(r#"
!Class: Cell fields: -3!
!Method: Main!
    ldnull
    ldfld 0.0
    pop
    ret
!Main: 0!
"#);
        assert!(matches!(result, Err(VmError::NullReference(_))));
    }

    const UNRELATED_F: &str = r#"
!Class: A methods: 0!
!Class: C methods: 1!
!Method: f returns: -3!
    ldc_i4 1
    ret
!Method: f returns: -3!
    ldc_i4 99
    ret
!Method: Main!
    newobj 1
    OPCODE 0
    call -3
    ret
!Main: 2!
"#;

    #[test]
    fn callvirt_rejects_a_receiver_outside_the_owner() {
        let (result, out) = run(&UNRELATED_F.replace("OPCODE", "callvirt"));
        assert!(matches!(result, Err(VmError::BytecodeInvalid(_))));
        assert_eq!(out, "");
    }

    #[test]
    fn call_rejects_a_receiver_outside_the_owner() {
        let (result, out) = run(&UNRELATED_F.replace("OPCODE", "call"));
        assert!(matches!(result, Err(VmError::BytecodeInvalid(_))));
        assert_eq!(out, "");
    }

    #[test]
    fn bad_return_value_is_reported_in_the_returning_frame() {
        let program = load(r#"
!Method: f returns: -3!
    ldc_b true
    ret
!Method: Main!
    call 0
    pop
    ret
!Main: 1!
"#);
        let console = StreamConsole::new(&b""[..], Vec::new());
        let mut interp: Interpreter<TestConsole> =
            Interpreter::boot(&program, VmConfig::default(), console).unwrap();
        interp.start(program.entry()).unwrap();
        interp.cycle().unwrap();
        interp.cycle().unwrap();
        assert!(matches!(interp.cycle(), Err(VmError::BytecodeInvalid(_))));
        assert_eq!(interp.frames().len(), 2);
        assert_eq!(interp.frames()[1].method, program.find_method(None, "f").unwrap());
    }

    #[test]
    fn casts_follow_the_base_chain() {
        let (result, out) = run(r#"
!Class: Animal!
!Class: Dog base: 0!
!Class: Rock!
!Method: Main locals: 0!
    newobj 1
    stloc 0
    ldloc 0
    isinst 0
    ldloc 0
    isinst 2
    not
    and
    brfalse :bad
    ldnull
    castclass 2
    pop
    ldloc 0
    castclass 0
    pop
    ldc_c 'y'
    call -2
    ldloc 0
    castclass 2
    pop
    ret
:bad
    ldc_c 'n'
    call -2
    ret
!Main: 0!
"#);
        assert!(matches!(result, Err(VmError::InvalidCast { .. })));
        assert_eq!(out, "y");
    }
}
