//! Multiboot 1 info structure and memory-map iteration.
//!
//! Field layout matches the original kernel's `multiboot_info_t` exactly
//! so the flag bits and offsets used to test for `mem_lower`/`mem_upper`
//! and `mmap_addr`/`mmap_length` line up with a real GRUB-provided struct.

use core::mem::size_of;

const FLAG_MEM: u32 = 1 << 0;
const FLAG_MMAP: u32 = 1 << 6;

#[repr(C, packed)]
struct RawMultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    syms: [u32; 4],
    mmap_length: u32,
    mmap_addr: u32,
    drives_length: u32,
    drives_addr: u32,
    config_table: u32,
    boot_loader_name: u32,
    apm_table: u32,
}

#[repr(C, packed)]
struct RawMmapEntry {
    size: u32,
    addr: u64,
    len: u64,
    entry_type: u32,
}

/// A single usable or reserved region from the BIOS memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    pub available: bool,
}

/// Parsed view of the bootloader-provided memory description.
pub struct MultibootInfo {
    mem_lower_kib: u32,
    mem_upper_kib: u32,
    mmap_addr: u32,
    mmap_length: u32,
    has_mmap: bool,
}

impl MultibootInfo {
    /// # Safety
    /// `ptr` must point at a valid `multiboot_info_t` supplied by the
    /// bootloader, live for the duration of this call.
    pub unsafe fn from_ptr(ptr: *const u8) -> Self {
        // SAFETY: forwarded from the caller's contract; `RawMultibootInfo`
        // matches the documented Multiboot 1 layout field-for-field.
        let raw = unsafe { &*(ptr as *const RawMultibootInfo) };
        let flags = raw.flags;
        Self {
            mem_lower_kib: if flags & FLAG_MEM != 0 { raw.mem_lower } else { 0 },
            mem_upper_kib: if flags & FLAG_MEM != 0 { raw.mem_upper } else { 0 },
            mmap_addr: raw.mmap_addr,
            mmap_length: raw.mmap_length,
            has_mmap: flags & FLAG_MMAP != 0,
        }
    }

    /// Total conventional + extended memory reported by BIOS `int 0x15/e820`
    /// via GRUB, in bytes. Used only as a sanity check against the mmap walk.
    pub fn reported_memory_bytes(&self) -> u64 {
        (self.mem_lower_kib as u64 + self.mem_upper_kib as u64) * 1024
    }

    /// Iterate the BIOS memory map, if the bootloader provided one.
    pub fn memory_map(&self) -> MemoryMapIter {
        MemoryMapIter {
            cursor: if self.has_mmap { self.mmap_addr } else { 0 },
            end: if self.has_mmap {
                self.mmap_addr + self.mmap_length
            } else {
                0
            },
        }
    }
}

pub struct MemoryMapIter {
    cursor: u32,
    end: u32,
}

impl Iterator for MemoryMapIter {
    type Item = MemoryMapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == 0 || self.cursor + size_of::<RawMmapEntry>() as u32 > self.end {
            return None;
        }
        // SAFETY: the memory map region was validated by the bootloader and
        // iteration stays within [mmap_addr, mmap_addr + mmap_length).
        let entry = unsafe { &*(self.cursor as *const RawMmapEntry) };
        let item = MemoryMapEntry {
            base: entry.addr,
            length: entry.len,
            available: entry.entry_type == 1,
        };
        // Each entry is prefixed by its own `size` field, excluding itself.
        self.cursor += entry.size + size_of::<u32>() as u32;
        Some(item)
    }
}
