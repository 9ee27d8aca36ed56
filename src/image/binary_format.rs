use crate::error::{Result, VmError};
use crate::image::{
    ArrayDef, ClassDef, Image, ImageFormat, InstructionDef, MethodDef, OperandDef, TypeDef,
};
use crate::opcode::{Opcode, OperandKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::prelude::*;

pub const MAGIC: &[u8] = b"OOVM";
pub const VERSION: u16 = 1;

const KIND_CLASS: u8 = 0;
const KIND_ARRAY: u8 = 1;

// Upper bound on speculative preallocation; real lengths come from the stream.
const MAX_PREALLOC: usize = 1024;

pub enum BinaryFormat {}

struct Reader<R> {
    inner: R,
}

impl<R: Read> Reader<R> {
    fn u8(&mut self) -> Result<u8> {
        self.inner.read_u8().map_err(VmError::from_decode)
    }

    fn u16(&mut self) -> Result<u16> {
        self.inner.read_u16::<BigEndian>().map_err(VmError::from_decode)
    }

    fn u32(&mut self) -> Result<u32> {
        self.inner.read_u32::<BigEndian>().map_err(VmError::from_decode)
    }

    fn i32(&mut self) -> Result<i32> {
        self.inner.read_i32::<BigEndian>().map_err(VmError::from_decode)
    }

    fn flag(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(VmError::image(format!("bad flag byte {}", other))),
        }
    }

    fn optional_index(&mut self) -> Result<Option<i32>> {
        let present = self.flag()?;
        let index = self.i32()?;
        Ok(if present { Some(index) } else { None })
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
        (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(VmError::from_decode)?;
        if buf.len() != len {
            return Err(VmError::image("truncated string"));
        }
        String::from_utf8(buf).map_err(|_| VmError::image("string is not valid UTF-8"))
    }

    fn indices(&mut self) -> Result<Vec<i32>> {
        let count = self.u32()? as usize;
        let mut out = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            out.push(self.i32()?);
        }
        Ok(out)
    }

    fn type_def(&mut self) -> Result<TypeDef> {
        match self.u8()? {
            KIND_CLASS => {
                let name = self.string()?;
                let base = self.optional_index()?;
                let fields = self.indices()?;
                let methods = self.indices()?;
                Ok(TypeDef::Class(ClassDef {
                    name,
                    base,
                    fields,
                    methods,
                }))
            }
            KIND_ARRAY => Ok(TypeDef::Array(ArrayDef {
                element: self.i32()?,
            })),
            other => Err(VmError::image(format!("unknown type kind {}", other))),
        }
    }

    fn operand(&mut self, kind: OperandKind) -> Result<OperandDef> {
        Ok(match kind {
            OperandKind::None => OperandDef::None,
            OperandKind::Int => OperandDef::Int(self.i32()?),
            OperandKind::Char => {
                let raw = self.u32()?;
                let c = std::char::from_u32(raw)
                    .ok_or_else(|| VmError::image(format!("bad char literal 0x{:X}", raw)))?;
                OperandDef::Char(c)
            }
            OperandKind::Bool => OperandDef::Bool(self.flag()?),
            OperandKind::Str => OperandDef::Str(self.string()?),
            OperandKind::Slot => OperandDef::Slot(self.u32()?),
            OperandKind::Branch => OperandDef::Branch(self.i32()?),
            OperandKind::Type => OperandDef::Type(self.i32()?),
            OperandKind::Method => OperandDef::Method(self.i32()?),
            OperandKind::Field => {
                let class = self.i32()?;
                let index = self.u32()?;
                OperandDef::Field { class, index }
            }
        })
    }

    fn method_def(&mut self) -> Result<MethodDef> {
        let name = self.string()?;
        let return_type = self.optional_index()?;
        let params = self.indices()?;
        let locals = self.indices()?;
        let count = self.u32()? as usize;
        let mut code = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let raw = self.u8()?;
            let opcode = Opcode::from_code(raw)
                .ok_or_else(|| VmError::image(format!("unknown opcode 0x{:02X} in {}", raw, name)))?;
            let operand = self.operand(opcode.operand_kind())?;
            code.push(InstructionDef { opcode, operand });
        }
        Ok(MethodDef {
            name,
            return_type,
            params,
            locals,
            code,
        })
    }
}

struct Writer<W> {
    inner: W,
}

impl<W: Write> Writer<W> {
    fn string(&mut self, s: &str) -> Result<()> {
        self.inner.write_u32::<BigEndian>(s.len() as u32)?;
        self.inner.write_all(s.as_bytes())?;
        Ok(())
    }

    fn optional_index(&mut self, index: Option<i32>) -> Result<()> {
        self.inner.write_u8(index.is_some() as u8)?;
        self.inner.write_i32::<BigEndian>(index.unwrap_or(0))?;
        Ok(())
    }

    fn indices(&mut self, indices: &[i32]) -> Result<()> {
        self.inner.write_u32::<BigEndian>(indices.len() as u32)?;
        for &i in indices {
            self.inner.write_i32::<BigEndian>(i)?;
        }
        Ok(())
    }

    fn operand(&mut self, operand: &OperandDef) -> Result<()> {
        match operand {
            OperandDef::None => {}
            OperandDef::Int(v) => self.inner.write_i32::<BigEndian>(*v)?,
            OperandDef::Char(c) => self.inner.write_u32::<BigEndian>(*c as u32)?,
            OperandDef::Bool(b) => self.inner.write_u8(*b as u8)?,
            OperandDef::Str(s) => self.string(s)?,
            OperandDef::Slot(slot) => self.inner.write_u32::<BigEndian>(*slot)?,
            OperandDef::Branch(offset) => self.inner.write_i32::<BigEndian>(*offset)?,
            OperandDef::Type(t) => self.inner.write_i32::<BigEndian>(*t)?,
            OperandDef::Method(m) => self.inner.write_i32::<BigEndian>(*m)?,
            OperandDef::Field { class, index } => {
                self.inner.write_i32::<BigEndian>(*class)?;
                self.inner.write_u32::<BigEndian>(*index)?;
            }
        }
        Ok(())
    }

    fn method_def(&mut self, method: &MethodDef) -> Result<()> {
        self.string(&method.name)?;
        self.optional_index(method.return_type)?;
        self.indices(&method.params)?;
        self.indices(&method.locals)?;
        self.inner.write_u32::<BigEndian>(method.code.len() as u32)?;
        for insn in &method.code {
            if insn.operand.kind() != insn.opcode.operand_kind() {
                return Err(VmError::image(format!(
                    "{} in {} carries a {:?} operand",
                    insn.opcode,
                    method.name,
                    insn.operand.kind()
                )));
            }
            self.inner.write_u8(insn.opcode.code())?;
            self.operand(&insn.operand)?;
        }
        Ok(())
    }
}

impl ImageFormat for BinaryFormat {
    fn read<R: BufRead>(reader: R) -> Result<Image> {
        let mut r = Reader { inner: reader };

        let mut magic = [0u8; 4];
        r.inner.read_exact(&mut magic).map_err(VmError::from_decode)?;
        if &magic[..] != MAGIC {
            return Err(VmError::image("not a binary image (bad magic)"));
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(VmError::image(format!("unsupported image version {}", version)));
        }

        let type_count = r.u32()? as usize;
        let mut types = Vec::with_capacity(type_count.min(MAX_PREALLOC));
        for _ in 0..type_count {
            types.push(r.type_def()?);
        }

        let method_count = r.u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(MAX_PREALLOC));
        for _ in 0..method_count {
            methods.push(r.method_def()?);
        }

        let main_method = r.i32()?;
        Ok(Image {
            types,
            methods,
            main_method,
        })
    }

    fn write<W: Write>(writer: W, image: &Image) -> Result<()> {
        let mut w = Writer { inner: writer };
        w.inner.write_all(MAGIC)?;
        w.inner.write_u16::<BigEndian>(VERSION)?;

        w.inner.write_u32::<BigEndian>(image.types.len() as u32)?;
        for ty in &image.types {
            match ty {
                TypeDef::Class(class) => {
                    w.inner.write_u8(KIND_CLASS)?;
                    w.string(&class.name)?;
                    w.optional_index(class.base)?;
                    w.indices(&class.fields)?;
                    w.indices(&class.methods)?;
                }
                TypeDef::Array(array) => {
                    w.inner.write_u8(KIND_ARRAY)?;
                    w.inner.write_i32::<BigEndian>(array.element)?;
                }
            }
        }

        w.inner.write_u32::<BigEndian>(image.methods.len() as u32)?;
        for method in &image.methods {
            w.method_def(method)?;
        }

        w.inner.write_i32::<BigEndian>(image.main_method)?;
        Ok(())
    }
}
