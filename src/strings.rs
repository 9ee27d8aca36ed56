use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

/// Index of an interned string. Stable for the life of the machine.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct StrRef(pub u32);

impl StrRef {
    pub const EMPTY: StrRef = StrRef(0);
}

impl Debug for StrRef {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "str#{}", self.0)
    }
}

/// Append-only string table. Strings are immutable and never reclaimed; interning the same
/// text twice yields the same index.
#[derive(Clone, Debug)]
pub struct StringTable {
    strings: Vec<Rc<str>>,
    index: HashMap<Rc<str>, StrRef>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        let mut table = StringTable {
            strings: Vec::new(),
            index: HashMap::new(),
        };
        table.intern("");
        table
    }

    pub fn intern(&mut self, text: &str) -> StrRef {
        if let Some(&existing) = self.index.get(text) {
            return existing;
        }
        let id = StrRef(self.strings.len() as u32);
        let text: Rc<str> = Rc::from(text);
        self.strings.push(Rc::clone(&text));
        self.index.insert(text, id);
        id
    }

    pub fn get(&self, id: StrRef) -> Option<&str> {
        self.strings.get(id.0 as usize).map(|s| &**s)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_preinterned() {
        let table = StringTable::new();
        assert_eq!(table.get(StrRef::EMPTY), Some(""));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn interning_deduplicates() {
        let mut table = StringTable::new();
        let a = table.intern("hello");
        let b = table.intern("world");
        assert_ne!(a, b);
        assert_eq!(table.intern("hello"), a);
        assert_eq!(table.get(b), Some("world"));
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(StrRef(99)), None);
    }
}
