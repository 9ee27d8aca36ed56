use std::fmt::{self, Display, Formatter};

/// What kind of operand follows an opcode, both in an image and after loading.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub enum OperandKind {
    None,
    Int,
    Char,
    Bool,
    Str,
    Slot,
    Branch,
    Type,
    Method,
    Field,
}

macro_rules! opcodes {
    ($($name:ident = $code:literal, $mnemonic:literal, $operand:ident;)*) => {
        #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
        pub enum Opcode {
            $($name,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            pub fn code(self) -> u8 {
                match self {
                    $(Opcode::$name => $code,)*
                }
            }

            pub fn from_code(code: u8) -> Option<Opcode> {
                match code {
                    $($code => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
                match mnemonic {
                    $($mnemonic => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(Opcode::$name => OperandKind::$operand,)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", None;

    LdcI4 = 0x01, "ldc_i4", Int;
    LdcC = 0x02, "ldc_c", Char;
    LdcB = 0x03, "ldc_b", Bool;
    LdStr = 0x04, "ldstr", Str;
    LdNull = 0x05, "ldnull", None;

    LdLoc = 0x10, "ldloc", Slot;
    StLoc = 0x11, "stloc", Slot;
    LdArg = 0x12, "ldarg", Slot;
    StArg = 0x13, "starg", Slot;
    LdThis = 0x14, "ldthis", None;

    LdFld = 0x20, "ldfld", Field;
    StFld = 0x21, "stfld", Field;
    NewObj = 0x22, "newobj", Type;
    NewArr = 0x23, "newarr", Type;
    LdElem = 0x24, "ldelem", None;
    StElem = 0x25, "stelem", None;
    LdLen = 0x26, "ldlen", None;

    Call = 0x30, "call", Method;
    CallVirt = 0x31, "callvirt", Method;
    Ret = 0x32, "ret", None;
    IsInst = 0x33, "isinst", Type;
    CastClass = 0x34, "castclass", Type;

    Br = 0x40, "br", Branch;
    BrTrue = 0x41, "brtrue", Branch;
    BrFalse = 0x42, "brfalse", Branch;

    Add = 0x50, "add", None;
    Sub = 0x51, "sub", None;
    Mul = 0x52, "mul", None;
    Div = 0x53, "div", None;
    Rem = 0x54, "rem", None;
    Neg = 0x55, "neg", None;

    Ceq = 0x60, "ceq", None;
    Cne = 0x61, "cne", None;
    Clt = 0x62, "clt", None;
    Cle = 0x63, "cle", None;
    Cgt = 0x64, "cgt", None;
    Cge = 0x65, "cge", None;

    And = 0x70, "and", None;
    Or = 0x71, "or", None;
    Not = 0x72, "not", None;

    ConvC = 0x78, "conv_c", None;
    ConvI = 0x79, "conv_i", None;

    Pop = 0x7E, "pop", None;
    Dup = 0x7F, "dup", None;
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_and_mnemonics_are_unique() {
        let codes: HashSet<u8> = Opcode::ALL.iter().map(|op| op.code()).collect();
        let names: HashSet<&str> = Opcode::ALL.iter().map(|op| op.mnemonic()).collect();
        assert_eq!(codes.len(), Opcode::ALL.len());
        assert_eq!(names.len(), Opcode::ALL.len());
    }

    #[test]
    fn lookup_both_ways() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Opcode::from_code(0xFF), None);
        assert_eq!(Opcode::from_mnemonic("jmp"), None);
    }
}
