/// A run of reclaimable heap bytes.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct Extent {
    pub addr: u32,
    pub size: u32,
}

impl Extent {
    pub fn new(addr: u32, size: u32) -> Self {
        Extent { addr, size }
    }

    pub fn end(self) -> u32 {
        self.addr + self.size
    }
}

/// The allocator's record of free heap space. Entries are kept in insertion order until
/// `compact` sorts and coalesces them.
#[derive(Clone, Debug, Default)]
pub struct FreeList {
    extents: Vec<Extent>,
}

impl FreeList {
    pub fn new() -> Self {
        FreeList {
            extents: Vec::new(),
        }
    }

    pub fn insert(&mut self, addr: u32, size: u32) {
        self.extents.push(Extent::new(addr, size));
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn free_bytes(&self) -> usize {
        self.extents.iter().map(|e| e.size as usize).sum()
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// First fit. An exact fit consumes the extent; a larger one gives up its front
    /// `size` bytes and stays in place. A leftover smaller than `min_remainder` is handed
    /// out with the block. Returns the block taken and, if the extent survived, what is
    /// left of it.
    pub fn take(&mut self, size: u32, min_remainder: u32) -> Option<(Extent, Option<Extent>)> {
        let pos = self.extents.iter().position(|e| e.size >= size)?;
        let extent = self.extents[pos];
        let remainder = extent.size - size;
        if remainder < min_remainder {
            self.extents.remove(pos);
            Some((extent, None))
        } else {
            let entry = &mut self.extents[pos];
            entry.addr += size;
            entry.size = remainder;
            Some((Extent::new(extent.addr, size), Some(*entry)))
        }
    }

    /// Sort by address and merge every run of adjacent extents into one.
    pub fn compact(&mut self) {
        self.extents.sort();
        let mut merged: Vec<Extent> = Vec::with_capacity(self.extents.len());
        for extent in self.extents.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == extent.addr => last.size += extent.size,
                _ => merged.push(extent),
            }
        }
        self.extents = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_extents_coalesce() {
        let mut list = FreeList::new();
        list.insert(400, 8);
        list.insert(8, 8);
        list.insert(0, 8);
        list.compact();
        assert_eq!(list.extents(), &[Extent::new(0, 16), Extent::new(400, 8)]);
    }

    #[test]
    fn long_runs_collapse_to_one() {
        let mut list = FreeList::new();
        for i in (0..10).rev() {
            list.insert(i * 12, 12);
        }
        list.insert(200, 4);
        list.compact();
        assert_eq!(list.extents(), &[Extent::new(0, 120), Extent::new(200, 4)]);
        for pair in list.extents().windows(2) {
            assert!(pair[0].end() < pair[1].addr);
        }
    }

    #[test]
    fn exact_fit_removes_entry() {
        let mut list = FreeList::new();
        list.insert(0, 16);
        list.insert(64, 32);
        assert_eq!(list.take(16, 8), Some((Extent::new(0, 16), None)));
        assert_eq!(list.extents(), &[Extent::new(64, 32)]);
    }

    #[test]
    fn oversize_fit_shrinks_in_place() {
        let mut list = FreeList::new();
        list.insert(0, 8);
        list.insert(64, 32);
        assert_eq!(
            list.take(12, 8),
            Some((Extent::new(64, 12), Some(Extent::new(76, 20))))
        );
        assert_eq!(list.extents(), &[Extent::new(0, 8), Extent::new(76, 20)]);
    }

    #[test]
    fn small_remainder_is_absorbed() {
        let mut list = FreeList::new();
        list.insert(0, 20);
        assert_eq!(list.take(16, 8), Some((Extent::new(0, 20), None)));
        assert!(list.is_empty());
        assert_eq!(list.take(1, 8), None);
    }
}
