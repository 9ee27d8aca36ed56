//! Live descriptors. A `Program` is the resolved form of an `Image`: every cross reference
//! is a typed handle into the program's own tables, every class has its field layout and
//! dispatch table, and every instruction operand names a descriptor directly.

use crate::opcode::Opcode;
use crate::strings::{StrRef, StringTable};
use crate::value::ValueKind;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct TypeRef(pub u32);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct MethodRef(pub u32);

impl TypeRef {
    pub const BOOL: TypeRef = TypeRef(0);
    pub const CHAR: TypeRef = TypeRef(1);
    pub const INT: TypeRef = TypeRef(2);
    pub const STRING: TypeRef = TypeRef(3);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl MethodRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Debug for TypeRef {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "type#{}", self.0)
    }
}

impl Debug for MethodRef {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "method#{}", self.0)
    }
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub enum InbuiltType {
    Bool,
    Char,
    Int,
    String,
}

impl InbuiltType {
    pub fn name(self) -> &'static str {
        match self {
            InbuiltType::Bool => "bool",
            InbuiltType::Char => "char",
            InbuiltType::Int => "int",
            InbuiltType::String => "string",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            InbuiltType::Bool => ValueKind::Bool,
            InbuiltType::Char => ValueKind::Char,
            InbuiltType::Int => ValueKind::Int,
            InbuiltType::String => ValueKind::Str,
        }
    }
}

#[derive(Clone, Debug)]
pub enum TypeDescriptor {
    Inbuilt(InbuiltType),
    Class(ClassDescriptor),
    Array(ArrayDescriptor),
}

impl TypeDescriptor {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypeDescriptor::Inbuilt(inbuilt) => inbuilt.kind(),
            TypeDescriptor::Class(_) | TypeDescriptor::Array(_) => ValueKind::Ref,
        }
    }
}

/// A resolved field: where it lives inside an instance payload and what it holds.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FieldSlot {
    pub ty: TypeRef,
    pub kind: ValueKind,
    pub offset: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ClassDescriptor {
    pub name: String,
    pub base: Option<TypeRef>,
    pub own_fields: Vec<TypeRef>,
    pub methods: Vec<MethodRef>,
    /// Every field of an instance, base class fields first.
    pub fields: Vec<FieldSlot>,
    /// Payload bytes of an instance.
    pub instance_size: u32,
    /// Method identifier to the most derived implementation visible from this class.
    pub vtable: BTreeMap<String, MethodRef>,
}

#[derive(Clone, Debug)]
pub struct ArrayDescriptor {
    pub element: TypeRef,
    pub element_kind: ValueKind,
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub enum Builtin {
    Halt,
    WriteChar,
    WriteInt,
    WriteString,
    ReadChar,
    ReadInt,
    ReadString,
}

impl Builtin {
    pub const ALL: [Builtin; 7] = [
        Builtin::Halt,
        Builtin::WriteChar,
        Builtin::WriteInt,
        Builtin::WriteString,
        Builtin::ReadChar,
        Builtin::ReadInt,
        Builtin::ReadString,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Halt => "Halt",
            Builtin::WriteChar => "WriteChar",
            Builtin::WriteInt => "WriteInt",
            Builtin::WriteString => "WriteString",
            Builtin::ReadChar => "ReadChar",
            Builtin::ReadInt => "ReadInt",
            Builtin::ReadString => "ReadString",
        }
    }

    pub fn param(self) -> Option<TypeRef> {
        match self {
            Builtin::Halt | Builtin::WriteString => Some(TypeRef::STRING),
            Builtin::WriteChar => Some(TypeRef::CHAR),
            Builtin::WriteInt => Some(TypeRef::INT),
            Builtin::ReadChar | Builtin::ReadInt | Builtin::ReadString => None,
        }
    }

    pub fn return_type(self) -> Option<TypeRef> {
        match self {
            Builtin::ReadChar => Some(TypeRef::CHAR),
            Builtin::ReadInt => Some(TypeRef::INT),
            Builtin::ReadString => Some(TypeRef::STRING),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MethodDescriptor {
    pub name: String,
    /// The class that declares this method. Built-ins and free methods have none.
    pub owner: Option<TypeRef>,
    pub builtin: Option<Builtin>,
    pub return_type: Option<TypeRef>,
    pub params: Vec<TypeRef>,
    pub locals: Vec<TypeRef>,
    pub code: Vec<Instruction>,
}

impl MethodDescriptor {
    /// Instance methods take a receiver beneath their arguments.
    pub fn is_instance(&self) -> bool {
        self.owner.is_some()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FieldRef {
    pub class: TypeRef,
    pub index: u32,
    pub slot: FieldSlot,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Operand {
    None,
    Int(i32),
    Char(char),
    Bool(bool),
    Str(StrRef),
    Slot(usize),
    Branch(isize),
    Type(TypeRef),
    Method(MethodRef),
    Field(FieldRef),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub(crate) types: Vec<TypeDescriptor>,
    pub(crate) methods: Vec<MethodDescriptor>,
    pub(crate) entry: MethodRef,
    pub(crate) strings: StringTable,
}

impl Program {
    pub fn entry(&self) -> MethodRef {
        self.entry
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn types(&self) -> impl Iterator<Item = (TypeRef, &TypeDescriptor)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, ty)| (TypeRef(i as u32), ty))
    }

    pub fn get_type(&self, ty: TypeRef) -> Option<&TypeDescriptor> {
        self.types.get(ty.index())
    }

    pub fn type_of(&self, ty: TypeRef) -> &TypeDescriptor {
        &self.types[ty.index()]
    }

    pub fn class(&self, ty: TypeRef) -> Option<&ClassDescriptor> {
        match self.get_type(ty) {
            Some(TypeDescriptor::Class(class)) => Some(class),
            _ => None,
        }
    }

    pub fn array(&self, ty: TypeRef) -> Option<&ArrayDescriptor> {
        match self.get_type(ty) {
            Some(TypeDescriptor::Array(array)) => Some(array),
            _ => None,
        }
    }

    pub fn method(&self, method: MethodRef) -> &MethodDescriptor {
        &self.methods[method.index()]
    }

    pub fn value_kind(&self, ty: TypeRef) -> ValueKind {
        self.type_of(ty).kind()
    }

    pub fn type_name(&self, ty: TypeRef) -> String {
        match self.get_type(ty) {
            Some(TypeDescriptor::Inbuilt(inbuilt)) => inbuilt.name().to_owned(),
            Some(TypeDescriptor::Class(class)) => class.name.clone(),
            Some(TypeDescriptor::Array(array)) => format!("{}[]", self.type_name(array.element)),
            None => format!("{:?}", ty),
        }
    }

    pub fn method_name(&self, method: MethodRef) -> String {
        let desc = self.method(method);
        match desc.owner {
            Some(owner) => format!("{}.{}", self.type_name(owner), desc.name),
            None => desc.name.clone(),
        }
    }

    /// Walk the base chain of `derived` looking for `base`. A class descends from itself.
    pub fn is_subclass_of(&self, derived: TypeRef, base: TypeRef) -> bool {
        let mut current = Some(derived);
        while let Some(ty) = current {
            if ty == base {
                return true;
            }
            current = self.class(ty).and_then(|class| class.base);
        }
        false
    }

    pub fn resolve_virtual(&self, class: TypeRef, name: &str) -> Option<MethodRef> {
        self.class(class)
            .and_then(|class| class.vtable.get(name))
            .cloned()
    }

    pub fn find_type(&self, name: &str) -> Option<TypeRef> {
        self.types().find_map(|(r, ty)| match ty {
            TypeDescriptor::Class(class) if class.name == name => Some(r),
            _ => None,
        })
    }

    pub fn find_method(&self, class: Option<&str>, name: &str) -> Option<MethodRef> {
        let owner = match class {
            Some(class) => Some(self.find_type(class)?),
            None => None,
        };
        self.methods
            .iter()
            .position(|m| m.name == name && m.owner == owner && m.builtin.is_none())
            .map(|i| MethodRef(i as u32))
    }
}
