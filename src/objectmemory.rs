//! The object memory: a fixed-size byte arena holding every class instance and array,
//! carved up by a first-fit free-list allocator and reclaimed by a non-moving mark-and-sweep
//! collector.
//!
//! Every block starts with an 8 byte header: the total block size followed by a tag word
//! whose high bit is the mark bit and whose remaining bits are the block's type descriptor
//! index. Free extents carry a header too (with `FREE_TAG`), so the whole arena can be
//! walked from base to limit by header sizes alone.

use crate::error::{Result, VmError};
use crate::program::{ArrayDescriptor, ClassDescriptor, FieldSlot, Program, TypeDescriptor, TypeRef};
use crate::strings::StrRef;
use crate::value::{Value, ValueKind};
use byteorder::{BigEndian, ByteOrder as _};
use log::debug;
use std::fmt::{self, Debug, Formatter};

pub mod free_list;

use self::free_list::FreeList;

pub const HEADER_SIZE: u32 = 8;
pub const ARRAY_LENGTH_SIZE: u32 = 4;

const MARK_BIT: u32 = 0x8000_0000;
const FREE_TAG: u32 = !MARK_BIT;

/// A heap address: the byte offset of a block's header inside the arena.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Addr(pub u32);

impl Addr {
    pub const NULL: Addr = Addr(u32::MAX);

    pub fn is_null(self) -> bool {
        self == Addr::NULL
    }
}

impl Default for Addr {
    fn default() -> Self {
        Addr::NULL
    }
}

impl Debug for Addr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "@0x{:X}", self.0)
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Header {
    pub size: u32,
    tag: u32,
}

impl Header {
    pub fn is_free(self) -> bool {
        self.tag & !MARK_BIT == FREE_TAG
    }

    pub fn is_marked(self) -> bool {
        self.tag & MARK_BIT != 0
    }

    pub fn type_ref(self) -> TypeRef {
        TypeRef(self.tag & !MARK_BIT)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct GcReport {
    pub marked: usize,
    pub freed_blocks: usize,
    pub freed_bytes: usize,
    pub live_bytes: usize,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct GcStats {
    pub allocations: usize,
    pub bytes_allocated: usize,
    pub collections: usize,
    pub last: GcReport,
}

pub struct ObjectMemory {
    arena: Vec<u8>,
    free_list: FreeList,
    stats: GcStats,
}

impl ObjectMemory {
    pub fn new(size: usize) -> Result<Self> {
        if size < HEADER_SIZE as usize || size >= Addr::NULL.0 as usize {
            return Err(VmError::exhausted(format!("unusable heap size {}", size)));
        }
        let mut memory = ObjectMemory {
            arena: vec![0; size],
            free_list: FreeList::new(),
            stats: GcStats::default(),
        };
        memory.free_list.insert(0, size as u32);
        memory.write_header(0, size as u32, FREE_TAG);
        Ok(memory)
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn free_bytes(&self) -> usize {
        self.free_list.free_bytes()
    }

    pub fn free_list(&self) -> &FreeList {
        &self.free_list
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    fn limit(&self) -> u32 {
        self.arena.len() as u32
    }

    fn read_header(&self, addr: u32) -> Result<Header> {
        if addr.checked_add(HEADER_SIZE).map_or(true, |end| end > self.limit()) {
            return Err(VmError::corruption(format!(
                "{:?} lies outside the heap",
                Addr(addr)
            )));
        }
        let at = addr as usize;
        Ok(Header {
            size: BigEndian::read_u32(&self.arena[at..at + 4]),
            tag: BigEndian::read_u32(&self.arena[at + 4..at + 8]),
        })
    }

    fn write_header(&mut self, addr: u32, size: u32, tag: u32) {
        let at = addr as usize;
        BigEndian::write_u32(&mut self.arena[at..at + 4], size);
        BigEndian::write_u32(&mut self.arena[at + 4..at + 8], tag);
    }

    fn set_mark(&mut self, addr: Addr, header: Header, marked: bool) {
        let tag = if marked {
            header.tag | MARK_BIT
        } else {
            header.tag & !MARK_BIT
        };
        self.write_header(addr.0, header.size, tag);
    }

    /// The header of the live block at `addr`. Anything else there is corruption.
    pub fn header(&self, addr: Addr) -> Result<Header> {
        let header = self.read_header(addr.0)?;
        let fits = addr
            .0
            .checked_add(header.size)
            .map_or(false, |end| end <= self.limit());
        if header.size < HEADER_SIZE || !fits || header.is_free() {
            return Err(VmError::corruption(format!(
                "{:?} is not a live block (size {}, free {})",
                addr,
                header.size,
                header.is_free()
            )));
        }
        Ok(header)
    }

    pub fn type_of(&self, addr: Addr) -> Result<TypeRef> {
        Ok(self.header(addr)?.type_ref())
    }

    pub fn is_allocated(&self, addr: Addr) -> bool {
        self.header(addr).is_ok()
    }

    /// Every live block in address order.
    pub fn blocks(&self) -> Result<Vec<(Addr, Header)>> {
        let mut out = Vec::new();
        let mut addr = 0;
        while addr < self.limit() {
            let header = self.read_header(addr)?;
            if header.size == 0 {
                return Err(VmError::corruption(format!(
                    "zero-size block at {:?}",
                    Addr(addr)
                )));
            }
            if addr.checked_add(header.size).map_or(true, |end| end > self.limit()) {
                return Err(VmError::corruption(format!(
                    "block at {:?} of size {} overruns the heap",
                    Addr(addr),
                    header.size
                )));
            }
            if !header.is_free() {
                out.push((Addr(addr), header));
            }
            addr += header.size;
        }
        Ok(out)
    }
}

// Allocation
impl ObjectMemory {
    /// Carve a zeroed block with room for `payload` bytes out of the free list. `None` when
    /// no extent is large enough.
    fn allocate_block(&mut self, payload: u32, ty: TypeRef) -> Option<Addr> {
        let size = payload.checked_add(HEADER_SIZE)?;
        let (block, rest) = self.free_list.take(size, HEADER_SIZE)?;
        if let Some(rest) = rest {
            self.write_header(rest.addr, rest.size, FREE_TAG);
        }

        let start = block.addr as usize;
        for byte in &mut self.arena[start..start + block.size as usize] {
            *byte = 0;
        }
        self.write_header(block.addr, block.size, ty.0);

        self.stats.allocations += 1;
        self.stats.bytes_allocated += block.size as usize;
        Some(Addr(block.addr))
    }

    pub fn instantiate_class(&mut self, ty: TypeRef, class: &ClassDescriptor) -> Option<Addr> {
        let addr = self.allocate_block(class.instance_size, ty)?;
        let payload = addr.0 + HEADER_SIZE;
        for field in class.fields.iter().filter(|f| f.kind == ValueKind::Ref) {
            self.write_value(payload + field.offset, Value::Ref(Addr::NULL));
        }
        Some(addr)
    }

    pub fn instantiate_array(
        &mut self,
        ty: TypeRef,
        array: &ArrayDescriptor,
        length: u32,
    ) -> Option<Addr> {
        let width = array.element_kind.width();
        let payload = length.checked_mul(width)?.checked_add(ARRAY_LENGTH_SIZE)?;
        let addr = self.allocate_block(payload, ty)?;
        let base = addr.0 + HEADER_SIZE;
        self.write_value(base, Value::Int(length as i32));
        if array.element_kind == ValueKind::Ref {
            for i in 0..length {
                self.write_value(base + ARRAY_LENGTH_SIZE + i * width, Value::Ref(Addr::NULL));
            }
        }
        Some(addr)
    }
}

// Field and element access
impl ObjectMemory {
    fn read_value(&self, pos: u32, kind: ValueKind) -> Result<Value> {
        let at = pos as usize;
        let word = || BigEndian::read_u32(&self.arena[at..at + 4]);
        Ok(match kind {
            ValueKind::Bool => Value::Bool(self.arena[at] != 0),
            ValueKind::Char => {
                let raw = word();
                Value::Char(std::char::from_u32(raw).ok_or_else(|| {
                    VmError::corruption(format!("char 0x{:X} stored at {:?}", raw, Addr(pos)))
                })?)
            }
            ValueKind::Int => Value::Int(word() as i32),
            ValueKind::Str => Value::Str(StrRef(word())),
            ValueKind::Ref => Value::Ref(Addr(word())),
        })
    }

    fn write_value(&mut self, pos: u32, value: Value) {
        let at = pos as usize;
        match value {
            Value::Bool(b) => self.arena[at] = b as u8,
            Value::Char(c) => BigEndian::write_u32(&mut self.arena[at..at + 4], c as u32),
            Value::Int(i) => BigEndian::write_i32(&mut self.arena[at..at + 4], i),
            Value::Str(s) => BigEndian::write_u32(&mut self.arena[at..at + 4], s.0),
            Value::Ref(addr) => BigEndian::write_u32(&mut self.arena[at..at + 4], addr.0),
        }
    }

    /// Byte position of `width` bytes at `offset` into the payload of `addr`.
    fn payload_pos(&self, addr: Addr, offset: u32, width: u32) -> Result<u32> {
        let header = self.header(addr)?;
        if HEADER_SIZE + offset + width > header.size {
            return Err(VmError::corruption(format!(
                "access at +{} overruns block {:?} of size {}",
                offset, addr, header.size
            )));
        }
        Ok(addr.0 + HEADER_SIZE + offset)
    }

    pub fn get_field(&self, obj: Addr, field: &FieldSlot) -> Result<Value> {
        let pos = self.payload_pos(obj, field.offset, field.kind.width())?;
        self.read_value(pos, field.kind)
    }

    pub fn put_field(&mut self, obj: Addr, field: &FieldSlot, value: Value) -> Result<()> {
        let pos = self.payload_pos(obj, field.offset, field.kind.width())?;
        self.write_value(pos, value);
        Ok(())
    }

    pub fn array_length(&self, array: Addr) -> Result<u32> {
        let pos = self.payload_pos(array, 0, ARRAY_LENGTH_SIZE)?;
        match self.read_value(pos, ValueKind::Int)? {
            Value::Int(len) => Ok(len as u32),
            _ => unreachable!("ints read back as ints"),
        }
    }

    fn element_pos(&self, array: Addr, kind: ValueKind, index: i32) -> Result<u32> {
        let length = self.array_length(array)?;
        if index < 0 || index as u32 >= length {
            return Err(VmError::IndexOutOfRange {
                index,
                length: length as usize,
            });
        }
        let width = kind.width();
        self.payload_pos(array, ARRAY_LENGTH_SIZE + index as u32 * width, width)
    }

    pub fn get_element(&self, array: Addr, kind: ValueKind, index: i32) -> Result<Value> {
        let pos = self.element_pos(array, kind, index)?;
        self.read_value(pos, kind)
    }

    pub fn put_element(&mut self, array: Addr, kind: ValueKind, index: i32, value: Value) -> Result<()> {
        let pos = self.element_pos(array, kind, index)?;
        self.write_value(pos, value);
        Ok(())
    }
}

// Collection
impl ObjectMemory {
    pub fn collect<I>(&mut self, program: &Program, roots: I) -> Result<GcReport>
    where
        I: IntoIterator<Item = Addr>,
    {
        let marked = self.mark(program, roots)?;
        let mut report = self.sweep()?;
        report.marked = marked;
        self.compact();

        self.stats.collections += 1;
        self.stats.last = report;
        debug!(
            "GC #{}: marked {}, freed {} blocks ({} bytes), {} bytes live, {} bytes free in {} extents",
            self.stats.collections,
            report.marked,
            report.freed_blocks,
            report.freed_bytes,
            report.live_bytes,
            self.free_bytes(),
            self.free_list.len()
        );
        Ok(report)
    }

    /// Trace from `roots` with an explicit worklist; a block is visited once however many
    /// paths lead to it.
    fn mark<I>(&mut self, program: &Program, roots: I) -> Result<usize>
    where
        I: IntoIterator<Item = Addr>,
    {
        let mut worklist: Vec<Addr> = roots.into_iter().filter(|a| !a.is_null()).collect();
        let mut marked = 0;

        while let Some(addr) = worklist.pop() {
            let header = self.header(addr)?;
            if header.is_marked() {
                continue;
            }
            self.set_mark(addr, header, true);
            marked += 1;

            let payload = addr.0 + HEADER_SIZE;
            match program.get_type(header.type_ref()) {
                Some(TypeDescriptor::Class(class)) => {
                    for field in class.fields.iter().filter(|f| f.kind == ValueKind::Ref) {
                        if let Value::Ref(child) = self.read_value(payload + field.offset, ValueKind::Ref)? {
                            if !child.is_null() {
                                worklist.push(child);
                            }
                        }
                    }
                }
                Some(TypeDescriptor::Array(array)) => {
                    if array.element_kind == ValueKind::Ref {
                        let length = self.array_length(addr)?;
                        for i in 0..length {
                            let pos = payload + ARRAY_LENGTH_SIZE + i * ValueKind::Ref.width();
                            if let Value::Ref(child) = self.read_value(pos, ValueKind::Ref)? {
                                if !child.is_null() {
                                    worklist.push(child);
                                }
                            }
                        }
                    }
                }
                _ => {
                    return Err(VmError::corruption(format!(
                        "block {:?} carries type tag {:?}",
                        addr,
                        header.type_ref()
                    )))
                }
            }
        }
        Ok(marked)
    }

    /// Walk the heap base to limit. Unmarked blocks become free extents; marked ones are
    /// unmarked and kept.
    fn sweep(&mut self) -> Result<GcReport> {
        let mut report = GcReport::default();
        let mut addr = 0;
        while addr < self.limit() {
            let header = self.read_header(addr)?;
            if header.size == 0 {
                return Err(VmError::corruption(format!(
                    "zero-size block at {:?}",
                    Addr(addr)
                )));
            }
            if addr.checked_add(header.size).map_or(true, |end| end > self.limit()) {
                return Err(VmError::corruption(format!(
                    "block at {:?} of size {} overruns the heap",
                    Addr(addr),
                    header.size
                )));
            }

            if header.is_free() {
                // already on the free list
            } else if header.is_marked() {
                self.set_mark(Addr(addr), header, false);
                report.live_bytes += header.size as usize;
            } else {
                self.free_list.insert(addr, header.size);
                self.write_header(addr, header.size, FREE_TAG);
                report.freed_blocks += 1;
                report.freed_bytes += header.size as usize;
            }
            addr += header.size;
        }
        Ok(report)
    }

    /// Coalesce the free list and restamp the merged extents so the heap stays walkable.
    fn compact(&mut self) {
        self.free_list.compact();
        let extents = self.free_list.extents().to_vec();
        for extent in extents {
            self.write_header(extent.addr, extent.size, FREE_TAG);
        }
    }
}
