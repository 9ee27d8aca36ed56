//! The text format is a hand-editable rendition of a program image. It carries exactly the
//! same information as the binary format and is what the test programs are written in.
//!
//! The format is line oriented:
//!
//! Header lines are wrapped in bangs:
//! `!Class: <name> [base: <type>] [fields: <type>*] [methods: <method>*]!`
//! `!Array: <element type>!`
//! `!Method: <name> [returns: <type>] [params: <type>*] [locals: <type>*]!`
//! `!Main: <method>!`
//!
//! Types and methods are numbered in order of appearance, starting at zero. The reserved
//! negative indices name the inbuilt types and methods.
//!
//! Every non-header line after a `!Method:` line belongs to that method: either an
//! instruction (`mnemonic [operand]`) or a label (`:name`). Branch operands are either a
//! label or a signed offset relative to the next instruction. Field operands are written
//! `<class>.<field index>`, chars as `'c'` and strings as `"text"`, both with backslash
//! escapes. Lines starting with `;` are comments.

use crate::error::{Result, VmError};
use crate::image::{
    ArrayDef, ClassDef, Image, ImageFormat, InstructionDef, MethodDef, OperandDef, TypeDef,
};
use crate::opcode::{Opcode, OperandKind};
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::prelude::*;

pub enum TextFormat {}

impl TextFormat {
    pub fn parse(source: &str) -> Result<Image> {
        Parser::new().parse(source.lines())
    }

    pub fn to_text(image: &Image) -> Result<String> {
        let mut buf = Vec::new();
        Self::write(&mut buf, image)?;
        String::from_utf8(buf).map_err(|_| VmError::image("text image is not valid UTF-8"))
    }
}

struct Patterns {
    header: Regex,
    class: Regex,
    array: Regex,
    method: Regex,
    main: Regex,
    label: Regex,
    insn: Regex,
    field: Regex,
}

impl Patterns {
    fn new() -> Self {
        let compile = |re: &str| Regex::new(re).expect("static pattern");
        Patterns {
            header: compile(r"^!(?P<kind>Class|Array|Method|Main):\s*(?P<body>.*?)\s*!$"),
            class: compile(
                r"^(?P<name>[^\s!]+)(?:\s+base:\s*(?P<base>-?\d+))?(?:\s+fields:(?P<fields>(?:\s+-?\d+)*))?(?:\s+methods:(?P<methods>(?:\s+-?\d+)*))?$",
            ),
            array: compile(r"^(?P<element>-?\d+)$"),
            method: compile(
                r"^(?P<name>[^\s!]+)(?:\s+returns:\s*(?P<ret>-?\d+))?(?:\s+params:(?P<params>(?:\s+-?\d+)*))?(?:\s+locals:(?P<locals>(?:\s+-?\d+)*))?$",
            ),
            main: compile(r"^(?P<index>-?\d+)$"),
            label: compile(r"^:(?P<label>[A-Za-z_][A-Za-z0-9_]*)$"),
            insn: compile(r"^(?P<op>[a-z_0-9]+)(?:\s+(?P<arg>.+))?$"),
            field: compile(r"^(?P<class>-?\d+)\.(?P<index>\d+)$"),
        }
    }
}

struct PendingMethod {
    def: MethodDef,
    labels: HashMap<String, usize>,
    // (instruction index, label, source line)
    fixups: Vec<(usize, String, usize)>,
}

struct Parser {
    patterns: Patterns,
    image: Image,
    current: Option<PendingMethod>,
    main: Option<i32>,
}

fn err_at(line: usize, msg: impl std::fmt::Display) -> VmError {
    VmError::image(format!("line {}: {}", line, msg))
}

fn parse_num<T: std::str::FromStr>(text: &str, line: usize) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| err_at(line, format!("bad number {:?}", text)))
}

fn parse_list(text: Option<regex::Match>, line: usize) -> Result<Vec<i32>> {
    match text {
        Some(m) => m
            .as_str()
            .split_whitespace()
            .map(|t| parse_num(t, line))
            .collect(),
        None => Ok(Vec::new()),
    }
}

impl Parser {
    fn new() -> Self {
        Parser {
            patterns: Patterns::new(),
            image: Image::default(),
            current: None,
            main: None,
        }
    }

    fn parse<'a, I: Iterator<Item = &'a str>>(mut self, lines: I) -> Result<Image> {
        for (i, raw) in lines.enumerate() {
            self.line(raw, i + 1)?;
        }
        self.finish_method()?;
        self.image.main_method = self
            .main
            .ok_or_else(|| VmError::image("text image has no !Main: line"))?;
        Ok(self.image)
    }

    fn line(&mut self, raw: &str, line: usize) -> Result<()> {
        let text = raw.trim();
        if text.is_empty() || text.starts_with(';') {
            return Ok(());
        }

        if let Some(caps) = self.patterns.header.captures(text) {
            self.finish_method()?;
            let body = caps.name("body").map_or("", |m| m.as_str());
            return match &caps["kind"] {
                "Class" => self.class_header(body, line),
                "Array" => self.array_header(body, line),
                "Method" => self.method_header(body, line),
                _ => self.main_header(body, line),
            };
        }

        if self.current.is_none() {
            return Err(err_at(line, "instruction outside of a method"));
        }

        if let Some(caps) = self.patterns.label.captures(text) {
            let label = caps["label"].to_owned();
            let method = self.current.as_mut().expect("checked above");
            let here = method.def.code.len();
            if method.labels.insert(label.clone(), here).is_some() {
                return Err(err_at(line, format!("label :{} defined twice", label)));
            }
            return Ok(());
        }

        let caps = self
            .patterns
            .insn
            .captures(text)
            .ok_or_else(|| err_at(line, format!("unparseable line {:?}", text)))?;
        let opcode = Opcode::from_mnemonic(&caps["op"])
            .ok_or_else(|| err_at(line, format!("unknown instruction {:?}", &caps["op"])))?;
        let arg = caps.name("arg").map(|m| m.as_str().trim());
        let operand = self.operand(opcode, arg, line)?;
        let method = self.current.as_mut().expect("checked above");
        method.def.code.push(InstructionDef { opcode, operand });
        Ok(())
    }

    fn class_header(&mut self, body: &str, line: usize) -> Result<()> {
        let caps = self
            .patterns
            .class
            .captures(body)
            .ok_or_else(|| err_at(line, "malformed !Class: header"))?;
        let base = match caps.name("base") {
            Some(m) => Some(parse_num(m.as_str(), line)?),
            None => None,
        };
        self.image.types.push(TypeDef::Class(ClassDef {
            name: caps["name"].to_owned(),
            base,
            fields: parse_list(caps.name("fields"), line)?,
            methods: parse_list(caps.name("methods"), line)?,
        }));
        Ok(())
    }

    fn array_header(&mut self, body: &str, line: usize) -> Result<()> {
        let caps = self
            .patterns
            .array
            .captures(body)
            .ok_or_else(|| err_at(line, "malformed !Array: header"))?;
        let element = parse_num(&caps["element"], line)?;
        self.image.types.push(TypeDef::Array(ArrayDef { element }));
        Ok(())
    }

    fn method_header(&mut self, body: &str, line: usize) -> Result<()> {
        let caps = self
            .patterns
            .method
            .captures(body)
            .ok_or_else(|| err_at(line, "malformed !Method: header"))?;
        let return_type = match caps.name("ret") {
            Some(m) => Some(parse_num(m.as_str(), line)?),
            None => None,
        };
        self.current = Some(PendingMethod {
            def: MethodDef {
                name: caps["name"].to_owned(),
                return_type,
                params: parse_list(caps.name("params"), line)?,
                locals: parse_list(caps.name("locals"), line)?,
                code: Vec::new(),
            },
            labels: HashMap::new(),
            fixups: Vec::new(),
        });
        Ok(())
    }

    fn main_header(&mut self, body: &str, line: usize) -> Result<()> {
        let caps = self
            .patterns
            .main
            .captures(body)
            .ok_or_else(|| err_at(line, "malformed !Main: header"))?;
        if self.main.is_some() {
            return Err(err_at(line, "second !Main: line"));
        }
        self.main = Some(parse_num(&caps["index"], line)?);
        Ok(())
    }

    fn finish_method(&mut self) -> Result<()> {
        let mut method = match self.current.take() {
            Some(method) => method,
            None => return Ok(()),
        };
        for (at, label, line) in method.fixups.drain(..) {
            let target = *method
                .labels
                .get(&label)
                .ok_or_else(|| err_at(line, format!("undefined label :{}", label)))?;
            let offset = target as i64 - (at as i64 + 1);
            method.def.code[at].operand = OperandDef::Branch(offset as i32);
        }
        self.image.methods.push(method.def);
        Ok(())
    }

    fn operand(&mut self, opcode: Opcode, arg: Option<&str>, line: usize) -> Result<OperandDef> {
        let kind = opcode.operand_kind();
        let arg = match (kind, arg) {
            (OperandKind::None, None) => return Ok(OperandDef::None),
            (OperandKind::None, Some(arg)) => {
                return Err(err_at(line, format!("{} takes no operand, got {:?}", opcode, arg)))
            }
            (_, None) => return Err(err_at(line, format!("{} needs an operand", opcode))),
            (_, Some(arg)) => arg,
        };

        Ok(match kind {
            OperandKind::None => unreachable!("handled above"),
            OperandKind::Int => OperandDef::Int(parse_num(arg, line)?),
            OperandKind::Char => {
                let inner = quoted(arg, '\'').ok_or_else(|| err_at(line, "expected 'c'"))?;
                let text = unescape(inner).map_err(|e| err_at(line, e))?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => OperandDef::Char(c),
                    _ => return Err(err_at(line, format!("char literal {} is not one char", arg))),
                }
            }
            OperandKind::Bool => match arg {
                "true" => OperandDef::Bool(true),
                "false" => OperandDef::Bool(false),
                _ => return Err(err_at(line, format!("bad bool {:?}", arg))),
            },
            OperandKind::Str => {
                let inner = quoted(arg, '"').ok_or_else(|| err_at(line, "expected \"text\""))?;
                OperandDef::Str(unescape(inner).map_err(|e| err_at(line, e))?)
            }
            OperandKind::Slot => OperandDef::Slot(parse_num(arg, line)?),
            OperandKind::Branch => {
                if let Some(label) = arg.strip_prefix(':') {
                    let method = self.current.as_mut().expect("inside a method");
                    let at = method.def.code.len();
                    method.fixups.push((at, label.to_owned(), line));
                    OperandDef::Branch(0)
                } else {
                    OperandDef::Branch(parse_num(arg, line)?)
                }
            }
            OperandKind::Type => OperandDef::Type(parse_num(arg, line)?),
            OperandKind::Method => OperandDef::Method(parse_num(arg, line)?),
            OperandKind::Field => {
                let caps = self
                    .patterns
                    .field
                    .captures(arg)
                    .ok_or_else(|| err_at(line, format!("bad field operand {:?}", arg)))?;
                OperandDef::Field {
                    class: parse_num(&caps["class"], line)?,
                    index: parse_num(&caps["index"], line)?,
                }
            }
        })
    }
}

fn quoted(arg: &str, quote: char) -> Option<&str> {
    if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
        Some(&arg[1..arg.len() - 1])
    } else {
        None
    }
}

fn unescape(text: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('u') => {
                if chars.next() != Some('{') {
                    return Err("expected { after \\u".to_owned());
                }
                let hex: String = chars.by_ref().take_while(|&c| c != '}').collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| format!("bad unicode escape {:?}", hex))?;
                out.push(
                    std::char::from_u32(code)
                        .ok_or_else(|| format!("bad unicode scalar {:X}", code))?,
                );
            }
            other => return Err(format!("unknown escape \\{}", other.unwrap_or(' '))),
        }
    }
    Ok(out)
}

fn escape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '!') {
        Err(VmError::image(format!(
            "identifier {:?} cannot be written in the text format",
            name
        )))
    } else {
        Ok(())
    }
}

fn list(indices: &[i32]) -> String {
    let mut out = String::new();
    for i in indices {
        let _ = write!(out, " {}", i);
    }
    out
}

impl ImageFormat for TextFormat {
    fn read<R: BufRead>(reader: R) -> Result<Image> {
        let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
        Parser::new().parse(lines.iter().map(String::as_str))
    }

    fn write<W: Write>(mut w: W, image: &Image) -> Result<()> {
        for ty in &image.types {
            match ty {
                TypeDef::Class(class) => {
                    check_name(&class.name)?;
                    write!(w, "!Class: {}", class.name)?;
                    if let Some(base) = class.base {
                        write!(w, " base: {}", base)?;
                    }
                    writeln!(
                        w,
                        " fields:{} methods:{}!",
                        list(&class.fields),
                        list(&class.methods)
                    )?;
                }
                TypeDef::Array(array) => writeln!(w, "!Array: {}!", array.element)?,
            }
        }

        for method in &image.methods {
            check_name(&method.name)?;
            write!(w, "!Method: {}", method.name)?;
            if let Some(ret) = method.return_type {
                write!(w, " returns: {}", ret)?;
            }
            writeln!(
                w,
                " params:{} locals:{}!",
                list(&method.params),
                list(&method.locals)
            )?;

            for insn in &method.code {
                if insn.operand.kind() != insn.opcode.operand_kind() {
                    return Err(VmError::image(format!(
                        "{} in {} carries a {:?} operand",
                        insn.opcode,
                        method.name,
                        insn.operand.kind()
                    )));
                }
                match &insn.operand {
                    OperandDef::None => writeln!(w, "\t{}", insn.opcode)?,
                    OperandDef::Int(v) => writeln!(w, "\t{} {}", insn.opcode, v)?,
                    OperandDef::Char(c) => {
                        writeln!(w, "\t{} {}", insn.opcode, escape(&c.to_string(), '\''))?
                    }
                    OperandDef::Bool(b) => writeln!(w, "\t{} {}", insn.opcode, b)?,
                    OperandDef::Str(s) => writeln!(w, "\t{} {}", insn.opcode, escape(s, '"'))?,
                    OperandDef::Slot(slot) => writeln!(w, "\t{} {}", insn.opcode, slot)?,
                    OperandDef::Branch(offset) => writeln!(w, "\t{} {:+}", insn.opcode, offset)?,
                    OperandDef::Type(t) => writeln!(w, "\t{} {}", insn.opcode, t)?,
                    OperandDef::Method(m) => writeln!(w, "\t{} {}", insn.opcode, m)?,
                    OperandDef::Field { class, index } => {
                        writeln!(w, "\t{} {}.{}", insn.opcode, class, index)?
                    }
                }
            }
        }

        writeln!(w, "!Main: {}!", image.main_method)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{INT_TYPE, STRING_TYPE, WRITE_INT_METHOD};

    const COUNTER: &str = r#"
; counts to five
!Method: Main locals: -3!
    ldc_i4 0
    stloc 0
:top
    ldloc 0
    ldc_i4 5
    clt
    brfalse :done
    ldloc 0
    ldc_i4 1
    add
    dup
    stloc 0
    call -3
    br :top
:done
    ret
!Main: 0!
"#;

    #[test]
    fn labels_become_relative_offsets() {
        let image = TextFormat::parse(COUNTER).unwrap();
        let code = &image.methods[0].code;
        assert_eq!(code.len(), 14);
        // brfalse at 5 jumps to ret at 13
        assert_eq!(code[5].operand, OperandDef::Branch(7));
        // br at 12 jumps back to ldloc at 2
        assert_eq!(code[12].operand, OperandDef::Branch(-11));
        assert_eq!(code[11].operand, OperandDef::Method(WRITE_INT_METHOD));
        assert_eq!(image.methods[0].locals, vec![INT_TYPE]);
    }

    #[test]
    fn headers_parse() {
        let image = TextFormat::parse(
            "!Class: Animal fields: -3 -4 methods: 0!\n\
             !Class: Dog base: 0 fields: methods:!\n\
             !Array: 1!\n\
             !Method: speak returns: -4 params: -3 locals:!\n\
             \tldstr \"wo\\\"of\\n\"\n\
             \tret\n\
             !Main: 0!\n",
        )
        .unwrap();
        assert_eq!(
            image.types[0],
            TypeDef::Class(ClassDef {
                name: "Animal".into(),
                base: None,
                fields: vec![INT_TYPE, STRING_TYPE],
                methods: vec![0],
            })
        );
        assert_eq!(
            image.types[1],
            TypeDef::Class(ClassDef {
                name: "Dog".into(),
                base: Some(0),
                fields: vec![],
                methods: vec![],
            })
        );
        assert_eq!(image.types[2], TypeDef::Array(ArrayDef { element: 1 }));
        let speak = &image.methods[0];
        assert_eq!(speak.return_type, Some(STRING_TYPE));
        assert_eq!(speak.params, vec![INT_TYPE]);
        assert_eq!(speak.code[0].operand, OperandDef::Str("wo\"of\n".into()));
    }

    #[test]
    fn write_then_parse_preserves_image() {
        let mut image = TextFormat::parse(COUNTER).unwrap();
        image.types.push(TypeDef::Class(ClassDef {
            name: "Box".into(),
            base: None,
            fields: vec![INT_TYPE],
            methods: vec![],
        }));
        image.methods[0].code.insert(
            0,
            InstructionDef::new(Opcode::LdcC, OperandDef::Char('\'')),
        );
        image.methods[0].code.insert(
            1,
            InstructionDef::new(Opcode::LdStr, OperandDef::Str("tab\there \u{1}".into())),
        );
        let text = TextFormat::to_text(&image).unwrap();
        assert_eq!(TextFormat::parse(&text).unwrap(), image);
    }

    #[test]
    fn rejects_garbage() {
        for bad in &[
            "!Method: f!\n\tfrobnicate\n!Main: 0!",
            "!Method: f!\n\tldc_i4\n!Main: 0!",
            "!Method: f!\n\tret 3\n!Main: 0!",
            "!Method: f!\n\tbr :nowhere\n!Main: 0!",
            "\tret\n!Main: 0!",
            "!Method: f!\n\tret\n",
            "!Method: f!\n\tldc_c 'ab'\n!Main: 0!",
        ] {
            let err = TextFormat::parse(bad).unwrap_err();
            assert!(matches!(err, VmError::ImageInvalid(_)), "{:?}", bad);
        }
    }
}
