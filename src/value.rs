use crate::objectmemory::Addr;
use crate::strings::StrRef;
use std::fmt::{self, Display, Formatter};

/// The runtime tag of a value. Everything a slot, field, element or stack entry can hold is
/// one of these.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum ValueKind {
    Bool,
    Char,
    Int,
    Str,
    Ref,
}

impl ValueKind {
    /// Bytes the kind occupies inside a heap block.
    pub fn width(self) -> u32 {
        match self {
            ValueKind::Bool => 1,
            ValueKind::Char | ValueKind::Int | ValueKind::Str | ValueKind::Ref => 4,
        }
    }

    pub fn default_value(self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Char => Value::Char('\0'),
            ValueKind::Int => Value::Int(0),
            ValueKind::Str => Value::Str(StrRef::EMPTY),
            ValueKind::Ref => Value::Ref(Addr::NULL),
        }
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        let s = match self {
            ValueKind::Bool => "bool",
            ValueKind::Char => "char",
            ValueKind::Int => "int",
            ValueKind::Str => "string",
            ValueKind::Ref => "reference",
        };
        write!(f, "{}", s)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Value {
    Bool(bool),
    Char(char),
    Int(i32),
    Str(StrRef),
    Ref(Addr),
}

impl Value {
    pub fn kind(self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Char(_) => ValueKind::Char,
            Value::Int(_) => ValueKind::Int,
            Value::Str(_) => ValueKind::Str,
            Value::Ref(_) => ValueKind::Ref,
        }
    }

    /// The heap address this value keeps alive, if any.
    pub fn as_root(self) -> Option<Addr> {
        match self {
            Value::Ref(addr) if !addr.is_null() => Some(addr),
            _ => None,
        }
    }
}
