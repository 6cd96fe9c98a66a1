//! Per-task virtual memory area table.
//!
//! This is the authoritative record of which ranges of a task's address
//! space are backed by what; `page_fault` consults it to tell a
//! legitimate demand-fault or COW-fault apart from a genuine access
//! violation, and `fork` clones it verbatim alongside the page directory
//! it describes.

use bitflags::bitflags;

use crate::error::KernelError;
use crate::mm::VirtAddr;

/// Upper bound on live VMAs per task.
pub const VMA_MAX_PER_TASK: usize = 64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u8 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaType {
    Anonymous,
    Heap,
    Stack,
    File,
}

#[derive(Debug, Clone, Copy)]
pub struct Vma {
    pub start: u32,
    pub end: u32,
    pub flags: VmaFlags,
    pub kind: VmaType,
}

impl Vma {
    fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }

    fn overlaps(&self, start: u32, end: u32) -> bool {
        start < self.end && end > self.start
    }
}

/// Fixed-capacity, sorted, non-overlapping list of VMAs for one task.
pub struct VmaTable {
    entries: [Option<Vma>; VMA_MAX_PER_TASK],
    len: usize,
    /// Next address `find_free` hands out when there is no gap below it.
    mmap_next: u32,
}

impl VmaTable {
    pub const fn new(mmap_base: u32) -> Self {
        Self {
            entries: [None; VMA_MAX_PER_TASK],
            len: 0,
            mmap_next: mmap_base,
        }
    }

    fn as_slice(&self) -> &[Option<Vma>] {
        &self.entries[..self.len]
    }

    fn check_invariant(&self) {
        debug_assert!(self.as_slice().windows(2).all(|w| match (w[0], w[1]) {
            (Some(a), Some(b)) => a.end <= b.start,
            _ => true,
        }));
    }

    /// Return the VMA covering `addr`, if any.
    pub fn find(&self, addr: VirtAddr) -> Option<Vma> {
        self.as_slice()
            .iter()
            .flatten()
            .find(|v| v.contains(addr.as_u32()))
            .copied()
    }

    /// Insert a new mapping `[start, end)`. Fails if it overlaps an
    /// existing VMA or the table is full.
    pub fn insert(
        &mut self,
        start: u32,
        end: u32,
        flags: VmaFlags,
        kind: VmaType,
    ) -> Result<(), KernelError> {
        if start >= end {
            return Err(KernelError::InvalidArgument {
                name: "range",
                value: "start >= end",
            });
        }
        if self.len >= VMA_MAX_PER_TASK {
            return Err(KernelError::ResourceExhausted { resource: "vma table" });
        }
        if self.as_slice().iter().flatten().any(|v| v.overlaps(start, end)) {
            return Err(KernelError::InvalidArgument {
                name: "range",
                value: "overlaps existing vma",
            });
        }

        let pos = self
            .as_slice()
            .iter()
            .flatten()
            .position(|v| v.start > start)
            .unwrap_or(self.len);
        for i in (pos..self.len).rev() {
            self.entries[i + 1] = self.entries[i];
        }
        self.entries[pos] = Some(Vma { start, end, flags, kind });
        self.len += 1;
        if end > self.mmap_next {
            self.mmap_next = end;
        }
        self.check_invariant();
        Ok(())
    }

    /// Remove `[start, end)` from the table, shrinking or splitting any
    /// VMA that straddles the boundary.
    pub fn remove(&mut self, start: u32, end: u32) -> Result<(), KernelError> {
        if start >= end {
            return Err(KernelError::InvalidArgument {
                name: "range",
                value: "start >= end",
            });
        }

        let mut rebuilt: [Option<Vma>; VMA_MAX_PER_TASK] = [None; VMA_MAX_PER_TASK];
        let mut n = 0;
        for v in self.as_slice().iter().flatten().copied() {
            if !v.overlaps(start, end) {
                rebuilt[n] = Some(v);
                n += 1;
                continue;
            }
            if v.start < start {
                if n >= VMA_MAX_PER_TASK {
                    return Err(KernelError::ResourceExhausted { resource: "vma table" });
                }
                rebuilt[n] = Some(Vma { start: v.start, end: start, ..v });
                n += 1;
            }
            if v.end > end {
                if n >= VMA_MAX_PER_TASK {
                    return Err(KernelError::ResourceExhausted { resource: "vma table" });
                }
                rebuilt[n] = Some(Vma { start: end, end: v.end, ..v });
                n += 1;
            }
        }
        self.entries = rebuilt;
        self.len = n;
        self.check_invariant();
        Ok(())
    }

    /// Split the VMA covering `addr` into two at `addr`, so later `remove`
    /// or flag changes can act on one half without touching the other.
    pub fn split(&mut self, addr: VirtAddr) -> Result<(), KernelError> {
        let addr = addr.as_u32();
        let Some(idx) = self
            .as_slice()
            .iter()
            .position(|e| matches!(e, Some(v) if v.contains(addr)))
        else {
            return Ok(());
        };
        let v = self.entries[idx].unwrap();
        if v.start == addr {
            return Ok(());
        }
        if self.len >= VMA_MAX_PER_TASK {
            return Err(KernelError::ResourceExhausted { resource: "vma table" });
        }
        self.entries[idx] = Some(Vma { start: v.start, end: addr, ..v });
        for i in (idx + 1..self.len).rev() {
            self.entries[i + 1] = self.entries[i];
        }
        self.entries[idx + 1] = Some(Vma { start: addr, end: v.end, ..v });
        self.len += 1;
        self.check_invariant();
        Ok(())
    }

    /// Find a gap of at least `len` bytes at or above `mmap_next`.
    pub fn find_free(&self, len: u32) -> Result<u32, KernelError> {
        let mut candidate = self.mmap_next;
        for v in self.as_slice().iter().flatten() {
            if candidate + len <= v.start {
                return Ok(candidate);
            }
            if v.end > candidate {
                candidate = v.end;
            }
        }
        candidate
            .checked_add(len)
            .map(|_| candidate)
            .ok_or(KernelError::ResourceExhausted { resource: "address space" })
    }

    /// Build a structural copy of `src`, used when forking a task's
    /// address space alongside [`crate::mm::vmm::clone_user_pagedir`].
    pub fn clone(src: &VmaTable) -> VmaTable {
        VmaTable {
            entries: src.entries,
            len: src.len,
            mmap_next: src.mmap_next,
        }
    }

    /// Drop every entry, e.g. when the owning task exits.
    pub fn destroy(&mut self) {
        self.entries = [None; VMA_MAX_PER_TASK];
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.as_slice().iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw() -> VmaFlags {
        VmaFlags::READ | VmaFlags::WRITE
    }

    #[test]
    fn insert_find_remove() {
        let mut t = VmaTable::new(0x1000_0000);
        t.insert(0x1000, 0x3000, rw(), VmaType::Anonymous).unwrap();
        assert!(t.find(VirtAddr::new(0x1500)).is_some());
        assert!(t.find(VirtAddr::new(0x3000)).is_none());
        t.remove(0x1000, 0x3000).unwrap();
        assert!(t.find(VirtAddr::new(0x1500)).is_none());
    }

    #[test]
    fn insert_rejects_overlap() {
        let mut t = VmaTable::new(0x1000_0000);
        t.insert(0x1000, 0x3000, rw(), VmaType::Anonymous).unwrap();
        assert!(t.insert(0x2000, 0x4000, rw(), VmaType::Anonymous).is_err());
    }

    #[test]
    fn remove_shrinks_and_splits() {
        let mut t = VmaTable::new(0x1000_0000);
        t.insert(0x1000, 0x5000, rw(), VmaType::Anonymous).unwrap();
        t.remove(0x2000, 0x3000).unwrap();
        assert!(t.find(VirtAddr::new(0x1500)).is_some());
        assert!(t.find(VirtAddr::new(0x2500)).is_none());
        assert!(t.find(VirtAddr::new(0x3500)).is_some());
    }

    #[test]
    fn find_free_skips_existing() {
        let mut t = VmaTable::new(0x1000_0000);
        t.insert(0x1000_0000, 0x1000_1000, rw(), VmaType::Anonymous).unwrap();
        let gap = t.find_free(0x1000).unwrap();
        assert_eq!(gap, 0x1000_1000);
    }

    #[test]
    fn clone_is_independent() {
        let mut t = VmaTable::new(0x1000_0000);
        t.insert(0x1000, 0x2000, rw(), VmaType::Anonymous).unwrap();
        let mut c = VmaTable::clone(&t);
        c.insert(0x2000, 0x3000, rw(), VmaType::Anonymous).unwrap();
        assert!(t.find(VirtAddr::new(0x2500)).is_none());
        assert!(c.find(VirtAddr::new(0x2500)).is_some());
    }
}
