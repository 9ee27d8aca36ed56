//! The program image: a flat, index-based description of every type and method a program
//! declares, as produced by the front end. Nothing in here is resolved; see `loader` for
//! that.

use crate::error::Result;
use crate::opcode::{Opcode, OperandKind};
use std::fs::File;
use std::io::{prelude::*, BufReader, BufWriter};
use std::path::Path;

pub mod binary_format;
pub mod text_format;

// Reserved type indices
pub const BOOL_TYPE: i32 = -1;
pub const CHAR_TYPE: i32 = -2;
pub const INT_TYPE: i32 = -3;
pub const STRING_TYPE: i32 = -4;
pub const INBUILT_TYPE_COUNT: usize = 4;

// Reserved method indices
pub const HALT_METHOD: i32 = -1;
pub const WRITE_CHAR_METHOD: i32 = -2;
pub const WRITE_INT_METHOD: i32 = -3;
pub const WRITE_STRING_METHOD: i32 = -4;
pub const READ_CHAR_METHOD: i32 = -5;
pub const READ_INT_METHOD: i32 = -6;
pub const READ_STRING_METHOD: i32 = -7;
pub const INBUILT_METHOD_COUNT: usize = 7;

pub trait ImageFormat {
    fn read<R: BufRead>(reader: R) -> Result<Image>;
    fn write<W: Write>(writer: W, image: &Image) -> Result<()>;

    fn load<P: AsRef<Path>>(path: P) -> Result<Image> {
        let f = File::open(path)?;
        Self::read(BufReader::new(f))
    }

    fn save<P: AsRef<Path>>(path: P, image: &Image) -> Result<()> {
        let f = File::create(path)?;
        let mut w = BufWriter::new(f);
        Self::write(&mut w, image)?;
        w.flush()?;
        Ok(())
    }
}

/// Load an image in whichever format the file is in.
pub fn load_any<P: AsRef<Path>>(path: P) -> Result<Image> {
    let mut r = BufReader::new(File::open(path)?);
    let is_binary = r.fill_buf()?.starts_with(binary_format::MAGIC);
    if is_binary {
        binary_format::BinaryFormat::read(r)
    } else {
        text_format::TextFormat::read(r)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Image {
    pub types: Vec<TypeDef>,
    pub methods: Vec<MethodDef>,
    pub main_method: i32,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TypeDef {
    Class(ClassDef),
    Array(ArrayDef),
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ClassDef {
    pub name: String,
    pub base: Option<i32>,
    pub fields: Vec<i32>,
    pub methods: Vec<i32>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ArrayDef {
    pub element: i32,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MethodDef {
    pub name: String,
    pub return_type: Option<i32>,
    pub params: Vec<i32>,
    pub locals: Vec<i32>,
    pub code: Vec<InstructionDef>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InstructionDef {
    pub opcode: Opcode,
    pub operand: OperandDef,
}

/// An unresolved operand. Types, methods and fields are still raw image indices here.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OperandDef {
    None,
    Int(i32),
    Char(char),
    Bool(bool),
    Str(String),
    Slot(u32),
    Branch(i32),
    Type(i32),
    Method(i32),
    Field { class: i32, index: u32 },
}

impl InstructionDef {
    pub fn new(opcode: Opcode, operand: OperandDef) -> Self {
        InstructionDef { opcode, operand }
    }

    pub fn simple(opcode: Opcode) -> Self {
        InstructionDef {
            opcode,
            operand: OperandDef::None,
        }
    }
}

impl OperandDef {
    pub fn kind(&self) -> OperandKind {
        match self {
            OperandDef::None => OperandKind::None,
            OperandDef::Int(_) => OperandKind::Int,
            OperandDef::Char(_) => OperandKind::Char,
            OperandDef::Bool(_) => OperandKind::Bool,
            OperandDef::Str(_) => OperandKind::Str,
            OperandDef::Slot(_) => OperandKind::Slot,
            OperandDef::Branch(_) => OperandKind::Branch,
            OperandDef::Type(_) => OperandKind::Type,
            OperandDef::Method(_) => OperandKind::Method,
            OperandDef::Field { .. } => OperandKind::Field,
        }
    }
}
