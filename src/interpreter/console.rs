use crate::error::{Result, VmError};
use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::io::{self, prelude::*};

/// A value the write built-ins hand to the console.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConsoleValue<'a> {
    Int(i32),
    Char(char),
    Str(&'a str),
}

impl<'a> Display for ConsoleValue<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ConsoleValue::Int(i) => write!(f, "{}", i),
            ConsoleValue::Char(c) => write!(f, "{}", c),
            ConsoleValue::Str(s) => f.write_str(s),
        }
    }
}

/// The machine's only window on the outside world. Every call blocks until done.
pub trait Console {
    fn write(&mut self, value: ConsoleValue) -> Result<()>;

    /// Skip leading whitespace and read an optionally signed decimal integer.
    fn read_int(&mut self) -> Result<i32>;

    /// The next character, or `'\0'` at end of input.
    fn read_char(&mut self) -> Result<char>;

    /// The rest of the current line without its terminator; empty at end of input.
    fn read_line(&mut self) -> Result<String>;
}

/// A console over any buffered reader and writer. Input is pulled a line at a time and
/// handed out character by character.
pub struct StreamConsole<R, W> {
    reader: R,
    writer: W,
    pending: VecDeque<char>,
}

impl StreamConsole<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        StreamConsole::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> StreamConsole<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        StreamConsole {
            reader,
            writer,
            pending: VecDeque::new(),
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Refill from the reader if nothing is buffered. False at end of input.
    fn fill(&mut self) -> Result<bool> {
        if !self.pending.is_empty() {
            return Ok(true);
        }
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        self.pending.extend(line.chars());
        Ok(true)
    }

    fn next_char(&mut self) -> Result<Option<char>> {
        Ok(if self.fill()? {
            self.pending.pop_front()
        } else {
            None
        })
    }

    fn peek_char(&mut self) -> Result<Option<char>> {
        Ok(if self.fill()? {
            self.pending.front().cloned()
        } else {
            None
        })
    }
}

impl<R: BufRead, W: Write> Console for StreamConsole<R, W> {
    fn write(&mut self, value: ConsoleValue) -> Result<()> {
        write!(self.writer, "{}", value)?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_int(&mut self) -> Result<i32> {
        while let Some(c) = self.peek_char()? {
            if !c.is_whitespace() {
                break;
            }
            self.pending.pop_front();
        }

        let mut digits = String::new();
        if let Some(sign) = self.peek_char()? {
            if sign == '-' || sign == '+' {
                digits.push(sign);
                self.pending.pop_front();
            }
        }
        while let Some(c) = self.peek_char()? {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(c);
            self.pending.pop_front();
        }

        if digits.is_empty() {
            let kind = if self.peek_char()?.is_none() {
                io::ErrorKind::UnexpectedEof
            } else {
                io::ErrorKind::InvalidData
            };
            return Err(VmError::Io(io::Error::new(kind, "expected an integer")));
        }
        digits.parse().map_err(|_| {
            VmError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{:?} is not a 32-bit integer", digits),
            ))
        })
    }

    fn read_char(&mut self) -> Result<char> {
        Ok(self.next_char()?.unwrap_or('\0'))
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        while let Some(c) = self.next_char()? {
            if c == '\n' {
                break;
            }
            line.push(c);
        }
        if line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console(input: &str) -> StreamConsole<&[u8], Vec<u8>> {
        StreamConsole::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn writes_render_plainly() {
        let mut c = console("");
        c.write(ConsoleValue::Int(-12)).unwrap();
        c.write(ConsoleValue::Char('x')).unwrap();
        c.write(ConsoleValue::Str(" ok\n")).unwrap();
        assert_eq!(c.writer(), b"-12x ok\n");
    }

    #[test]
    fn reads_mix_chars_ints_and_lines() {
        let mut c = console("ab 42\r\n  -7 rest of line\nlast");
        assert_eq!(c.read_char().unwrap(), 'a');
        assert_eq!(c.read_line().unwrap(), "b 42");
        assert_eq!(c.read_int().unwrap(), -7);
        assert_eq!(c.read_line().unwrap(), " rest of line");
        assert_eq!(c.read_line().unwrap(), "last");
        assert_eq!(c.read_char().unwrap(), '\0');
        assert_eq!(c.read_line().unwrap(), "");
    }

    #[test]
    fn bad_integers_are_io_errors() {
        let mut c = console("abc\n99999999999\n");
        assert!(matches!(c.read_int(), Err(VmError::Io(_))));
        assert_eq!(c.read_line().unwrap(), "abc");
        assert!(matches!(c.read_int(), Err(VmError::Io(_))));
        assert!(matches!(c.read_int(), Err(VmError::Io(_))));
    }
}
