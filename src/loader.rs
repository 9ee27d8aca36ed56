//! Turns a flat `Image` into a linked `Program`.
//!
//! Registration happens in two passes so that types and methods can refer to each other in
//! any order, including recursively: the first pass creates an empty descriptor for every
//! declared type and method, the second fills in the cross references. Layout (field
//! offsets) and dispatch tables are computed afterwards, base classes first.

use crate::error::{Result, VmError};
use crate::image::{
    Image, InstructionDef, OperandDef, TypeDef, INBUILT_METHOD_COUNT, INBUILT_TYPE_COUNT,
};
use crate::opcode::Opcode;
use crate::program::{
    ArrayDescriptor, Builtin, ClassDescriptor, FieldRef, FieldSlot, InbuiltType, Instruction,
    MethodDescriptor, MethodRef, Operand, Program, TypeDescriptor, TypeRef,
};
use crate::strings::StringTable;
use crate::value::ValueKind;
use log::{debug, info};

pub fn load(image: &Image) -> Result<Program> {
    Loader::new(image).load()
}

struct Loader<'a> {
    image: &'a Image,
    types: Vec<TypeDescriptor>,
    methods: Vec<MethodDescriptor>,
    strings: StringTable,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum LayoutState {
    Pending,
    Visiting,
    Done,
}

impl<'a> Loader<'a> {
    fn new(image: &'a Image) -> Self {
        Loader {
            image,
            types: Vec::with_capacity(INBUILT_TYPE_COUNT + image.types.len()),
            methods: Vec::with_capacity(INBUILT_METHOD_COUNT + image.methods.len()),
            strings: StringTable::new(),
        }
    }

    fn load(mut self) -> Result<Program> {
        self.register_inbuilts();
        self.allocate_shells();
        self.link_types()?;
        self.link_methods()?;
        self.layout_classes()?;
        self.resolve_code()?;
        let entry = self.resolve_entry()?;

        info!(
            "Loaded image: {} types, {} methods, {} string literals",
            self.image.types.len(),
            self.image.methods.len(),
            self.strings.len() - 1
        );

        Ok(Program {
            types: self.types,
            methods: self.methods,
            entry,
            strings: self.strings,
        })
    }

    fn register_inbuilts(&mut self) {
        for &inbuilt in &[
            InbuiltType::Bool,
            InbuiltType::Char,
            InbuiltType::Int,
            InbuiltType::String,
        ] {
            self.types.push(TypeDescriptor::Inbuilt(inbuilt));
        }
        for &builtin in Builtin::ALL.iter() {
            self.methods.push(MethodDescriptor {
                name: builtin.name().to_owned(),
                owner: None,
                builtin: Some(builtin),
                return_type: builtin.return_type(),
                params: builtin.param().into_iter().collect(),
                locals: Vec::new(),
                code: Vec::new(),
            });
        }
    }

    // Pass 1
    fn allocate_shells(&mut self) {
        let image = self.image;
        for def in &image.types {
            self.types.push(match def {
                TypeDef::Class(class) => TypeDescriptor::Class(ClassDescriptor {
                    name: class.name.clone(),
                    ..ClassDescriptor::default()
                }),
                // patched in link_types
                TypeDef::Array(_) => TypeDescriptor::Array(ArrayDescriptor {
                    element: TypeRef::INT,
                    element_kind: ValueKind::Int,
                }),
            });
        }
        for def in &image.methods {
            self.methods.push(MethodDescriptor {
                name: def.name.clone(),
                ..MethodDescriptor::default()
            });
        }
    }

    fn type_ref(&self, index: i32) -> Result<TypeRef> {
        let slot = if index < 0 {
            let inbuilt = (-(index as i64) - 1) as usize;
            if inbuilt < INBUILT_TYPE_COUNT {
                Some(inbuilt)
            } else {
                None
            }
        } else if (index as usize) < self.image.types.len() {
            Some(INBUILT_TYPE_COUNT + index as usize)
        } else {
            None
        };
        slot.map(|i| TypeRef(i as u32))
            .ok_or_else(|| VmError::image(format!("type index {} does not resolve", index)))
    }

    fn method_ref(&self, index: i32) -> Result<MethodRef> {
        let slot = if index < 0 {
            let inbuilt = (-(index as i64) - 1) as usize;
            if inbuilt < INBUILT_METHOD_COUNT {
                Some(inbuilt)
            } else {
                None
            }
        } else if (index as usize) < self.image.methods.len() {
            Some(INBUILT_METHOD_COUNT + index as usize)
        } else {
            None
        };
        slot.map(|i| MethodRef(i as u32))
            .ok_or_else(|| VmError::image(format!("method index {} does not resolve", index)))
    }

    fn type_refs(&self, indices: &[i32]) -> Result<Vec<TypeRef>> {
        indices.iter().map(|&i| self.type_ref(i)).collect()
    }

    fn is_class(&self, ty: TypeRef) -> bool {
        match self.types[ty.index()] {
            TypeDescriptor::Class(_) => true,
            _ => false,
        }
    }

    fn is_array(&self, ty: TypeRef) -> bool {
        match self.types[ty.index()] {
            TypeDescriptor::Array(_) => true,
            _ => false,
        }
    }

    // Pass 2
    fn link_types(&mut self) -> Result<()> {
        let image = self.image;
        for (i, def) in image.types.iter().enumerate() {
            let this = TypeRef((INBUILT_TYPE_COUNT + i) as u32);
            match def {
                TypeDef::Class(def) => {
                    let base = match def.base {
                        Some(index) => {
                            let base = self.type_ref(index)?;
                            if !self.is_class(base) || base == this {
                                return Err(VmError::image(format!(
                                    "class {} has an invalid base (index {})",
                                    def.name, index
                                )));
                            }
                            Some(base)
                        }
                        None => None,
                    };
                    let own_fields = self.type_refs(&def.fields)?;
                    let mut methods = Vec::with_capacity(def.methods.len());
                    for &index in &def.methods {
                        let method = self.method_ref(index)?;
                        if index < 0 {
                            return Err(VmError::image(format!(
                                "class {} claims the built-in {}",
                                def.name,
                                self.methods[method.index()].name
                            )));
                        }
                        let desc = &mut self.methods[method.index()];
                        if desc.owner.is_some() {
                            return Err(VmError::image(format!(
                                "method {} is declared by more than one class",
                                desc.name
                            )));
                        }
                        desc.owner = Some(this);
                        methods.push(method);
                    }

                    if let TypeDescriptor::Class(class) = &mut self.types[this.index()] {
                        class.base = base;
                        class.own_fields = own_fields;
                        class.methods = methods;
                    }
                }
                TypeDef::Array(def) => {
                    let element = self.type_ref(def.element)?;
                    let element_kind = self.types[element.index()].kind();
                    self.types[this.index()] = TypeDescriptor::Array(ArrayDescriptor {
                        element,
                        element_kind,
                    });
                }
            }
        }
        Ok(())
    }

    fn link_methods(&mut self) -> Result<()> {
        let image = self.image;
        for (i, def) in image.methods.iter().enumerate() {
            let return_type = match def.return_type {
                Some(index) => Some(self.type_ref(index)?),
                None => None,
            };
            let params = self.type_refs(&def.params)?;
            let locals = self.type_refs(&def.locals)?;
            let desc = &mut self.methods[INBUILT_METHOD_COUNT + i];
            desc.return_type = return_type;
            desc.params = params;
            desc.locals = locals;
        }
        Ok(())
    }

    fn layout_classes(&mut self) -> Result<()> {
        let mut state = vec![LayoutState::Pending; self.types.len()];
        for i in 0..self.types.len() {
            if self.is_class(TypeRef(i as u32)) {
                self.layout_class(TypeRef(i as u32), &mut state)?;
            }
        }
        Ok(())
    }

    /// Lay out `ty` after every class above it. The chain is walked iteratively so deep
    /// hierarchies do not recurse.
    fn layout_class(&mut self, ty: TypeRef, state: &mut [LayoutState]) -> Result<()> {
        let mut chain = Vec::new();
        let mut current = Some(ty);
        while let Some(class) = current {
            match state[class.index()] {
                LayoutState::Done => break,
                LayoutState::Visiting => {
                    return Err(VmError::image(format!(
                        "inheritance cycle through class {}",
                        self.class_name(class)
                    )))
                }
                LayoutState::Pending => {
                    state[class.index()] = LayoutState::Visiting;
                    chain.push(class);
                    current = self.class_desc(class).base;
                }
            }
        }

        for &class in chain.iter().rev() {
            let (mut fields, mut size, mut vtable) = match self.class_desc(class).base {
                Some(base) => {
                    let base = self.class_desc(base);
                    (base.fields.clone(), base.instance_size, base.vtable.clone())
                }
                None => Default::default(),
            };

            let own_fields = self.class_desc(class).own_fields.clone();
            for ty in own_fields {
                let kind = self.types[ty.index()].kind();
                fields.push(FieldSlot {
                    ty,
                    kind,
                    offset: size,
                });
                size += kind.width();
            }

            for &method in &self.class_desc(class).methods {
                vtable.insert(self.methods[method.index()].name.clone(), method);
            }

            debug!(
                "Class {}: {} fields, {} payload bytes, {} vtable entries",
                self.class_name(class),
                fields.len(),
                size,
                vtable.len()
            );

            if let TypeDescriptor::Class(desc) = &mut self.types[class.index()] {
                desc.fields = fields;
                desc.instance_size = size;
                desc.vtable = vtable;
            }
            state[class.index()] = LayoutState::Done;
        }
        Ok(())
    }

    fn class_desc(&self, ty: TypeRef) -> &ClassDescriptor {
        match &self.types[ty.index()] {
            TypeDescriptor::Class(class) => class,
            _ => unreachable!("{:?} was checked to be a class", ty),
        }
    }

    fn class_name(&self, ty: TypeRef) -> &str {
        &self.class_desc(ty).name
    }

    fn resolve_code(&mut self) -> Result<()> {
        let image = self.image;
        for (i, def) in image.methods.iter().enumerate() {
            let method = MethodRef((INBUILT_METHOD_COUNT + i) as u32);
            let mut code = Vec::with_capacity(def.code.len());
            for (ip, insn) in def.code.iter().enumerate() {
                let operand = self.resolve_operand(method, ip, def.code.len(), insn)?;
                code.push(Instruction {
                    opcode: insn.opcode,
                    operand,
                });
            }
            self.methods[method.index()].code = code;
        }
        Ok(())
    }

    fn resolve_operand(
        &mut self,
        method: MethodRef,
        ip: usize,
        len: usize,
        insn: &InstructionDef,
    ) -> Result<Operand> {
        let desc = &self.methods[method.index()];
        let fail = |msg: String| {
            VmError::image(format!("{} in {} at {}: {}", insn.opcode, desc.name, ip, msg))
        };

        if insn.operand.kind() != insn.opcode.operand_kind() {
            return Err(fail(format!(
                "expected a {:?} operand, found {:?}",
                insn.opcode.operand_kind(),
                insn.operand.kind()
            )));
        }

        let operand = match &insn.operand {
            OperandDef::None => {
                if insn.opcode == Opcode::LdThis && !desc.is_instance() {
                    return Err(fail("method has no receiver".to_owned()));
                }
                Operand::None
            }
            OperandDef::Int(v) => Operand::Int(*v),
            OperandDef::Char(c) => Operand::Char(*c),
            OperandDef::Bool(b) => Operand::Bool(*b),
            OperandDef::Str(text) => Operand::Str(self.strings.intern(text)),
            OperandDef::Slot(slot) => {
                let slot = *slot as usize;
                let count = match insn.opcode {
                    Opcode::LdArg | Opcode::StArg => desc.params.len(),
                    _ => desc.locals.len(),
                };
                if slot >= count {
                    return Err(fail(format!("slot {} of {}", slot, count)));
                }
                Operand::Slot(slot)
            }
            OperandDef::Branch(offset) => {
                let target = ip as i64 + 1 + *offset as i64;
                if target < 0 || target >= len as i64 {
                    return Err(fail(format!("branch target {} outside the method", target)));
                }
                Operand::Branch(*offset as isize)
            }
            OperandDef::Type(index) => {
                let ty = self.type_ref(*index).map_err(|e| fail(e.to_string()))?;
                let ok = match insn.opcode {
                    Opcode::NewArr => self.is_array(ty),
                    _ => self.is_class(ty),
                };
                if !ok {
                    return Err(fail(format!("unsuitable type index {}", index)));
                }
                Operand::Type(ty)
            }
            OperandDef::Method(index) => {
                Operand::Method(self.method_ref(*index).map_err(|e| fail(e.to_string()))?)
            }
            OperandDef::Field { class, index } => {
                let class = self.type_ref(*class).map_err(|e| fail(e.to_string()))?;
                if !self.is_class(class) {
                    return Err(fail("field owner is not a class".to_owned()));
                }
                let slot = *self
                    .class_desc(class)
                    .fields
                    .get(*index as usize)
                    .ok_or_else(|| fail(format!("no field {}", index)))?;
                Operand::Field(FieldRef {
                    class,
                    index: *index,
                    slot,
                })
            }
        };
        Ok(operand)
    }

    fn resolve_entry(&self) -> Result<MethodRef> {
        let index = self.image.main_method;
        if index < 0 {
            return Err(VmError::image("entry point is a built-in"));
        }
        let entry = self.method_ref(index)?;
        let desc = &self.methods[entry.index()];
        if !desc.params.is_empty() || desc.return_type.is_some() {
            return Err(VmError::image(format!(
                "entry point {} must take no parameters and return nothing",
                desc.name
            )));
        }
        if desc.is_instance() {
            return Err(VmError::image(format!(
                "entry point {} needs a receiver",
                desc.name
            )));
        }
        Ok(entry)
    }
}
