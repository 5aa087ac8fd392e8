//! Section-keyed byte memory with per-address breakpoint masks and
//! initialization tracking.
//!
//! The `Storage` trait is a contiguous byte buffer with endian-aware,
//! size-generic accessors, plus the "undefined until written" tracking and
//! breakpoint masking a teaching simulator needs on top of plain bytes.

use crate::error::MemoryError;
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

pub type Endian = LittleEndian;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MemFlags: u8 {
        const EXECUTE      = 0b0001;
        const WRITE        = 0b0010;
        const READ         = 0b0100;
        const UNINITIALIZED = 0b1000;
    }
}

/// A contiguous block of memory with an initialization mask and a
/// breakpoint mask, one bit/nibble per byte.
///
/// # Examples
/// ```
/// use armcore::memory::Section;
///
/// let mut section = Section::new(16);
/// assert_eq!(section.length(), 16);
/// assert!(section.read_word(0, false).is_err()); // uninitialized
/// section.write_word(0, 0xdead_beef, false).unwrap();
/// assert_eq!(section.read_word(0, false).unwrap(), 0xdead_beef);
/// ```
#[derive(Debug)]
pub struct Section {
    data: Vec<u8>,
    initialized: Vec<bool>,
    breakpoints: Vec<MemFlags>,
}

impl Section {
    pub fn new(length: u32) -> Section {
        Section {
            data: vec![0; length as usize],
            initialized: vec![false; length as usize],
            breakpoints: vec![MemFlags::empty(); length as usize],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Section {
        Section {
            data: bytes.to_vec(),
            initialized: vec![true; bytes.len()],
            breakpoints: vec![MemFlags::empty(); bytes.len()],
        }
    }

    pub fn length(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn resize(&mut self, length: u32) {
        self.data.resize(length as usize, 0);
        self.initialized.resize(length as usize, false);
        self.breakpoints.resize(length as usize, MemFlags::empty());
    }

    fn check_range(&self, address: u32, size: u32) -> bool {
        let len = self.data.len() as u32;
        address <= len && address.saturating_add(size) <= len
    }

    pub fn set_breakpoint(&mut self, address: u32, flags: MemFlags) {
        if (address as usize) < self.breakpoints.len() {
            self.breakpoints[address as usize] = flags;
        }
    }

    pub fn breakpoint_at(&self, address: u32) -> MemFlags {
        self.breakpoints
            .get(address as usize)
            .copied()
            .unwrap_or_else(MemFlags::empty)
    }

    /// Returns the union of breakpoint flags over `[address, address+size)`,
    /// plus `UNINITIALIZED` if any byte in the range hasn't been written.
    pub fn pending_breakpoint(&self, address: u32, size: u32, kind: MemFlags) -> Option<MemFlags> {
        let mut hit = MemFlags::empty();
        for a in address..address + size {
            let idx = a as usize;
            if let Some(bp) = self.breakpoints.get(idx) {
                if bp.intersects(kind) {
                    hit |= *bp & kind;
                }
            }
            if kind.contains(MemFlags::READ) && !self.initialized.get(idx).copied().unwrap_or(false)
            {
                let bp = self.breakpoints.get(idx).copied().unwrap_or_else(MemFlags::empty);
                if bp.contains(MemFlags::UNINITIALIZED) {
                    hit |= MemFlags::UNINITIALIZED;
                }
            }
        }
        if hit.is_empty() {
            None
        } else {
            Some(hit)
        }
    }

    fn is_fully_initialized(&self, address: u32, size: u32) -> bool {
        (address..address + size).all(|a| self.initialized.get(a as usize).copied().unwrap_or(false))
    }

    pub fn read(&self, address: u32, size: u32, allow_uninitialized: bool) -> Result<u32, MemoryError> {
        assert!((1..=4).contains(&size));
        if !self.check_range(address, size) {
            return Err(MemoryError::OutOfRange { address, size });
        }
        if !allow_uninitialized && !self.is_fully_initialized(address, size) {
            return Err(MemoryError::Uninitialized { address, size });
        }
        let start = address as usize;
        Ok(Endian::read_uint(&self.data[start..start + size as usize], size as usize) as u32)
    }

    pub fn read_byte(&self, address: u32, allow_uninitialized: bool) -> Result<u8, MemoryError> {
        self.read(address, 1, allow_uninitialized).map(|v| v as u8)
    }

    pub fn read_word(&self, address: u32, allow_uninitialized: bool) -> Result<u32, MemoryError> {
        self.read(address, 4, allow_uninitialized)
    }

    pub fn write(&mut self, address: u32, size: u32, value: u32, allow_oob: bool) -> Result<(), MemoryError> {
        assert!((1..=4).contains(&size));
        if !self.check_range(address, size) {
            if allow_oob {
                let needed = address + size;
                if needed > self.length() {
                    self.resize(needed);
                }
            } else {
                return Err(MemoryError::OutOfRange { address, size });
            }
        }
        let start = address as usize;
        Endian::write_uint(&mut self.data[start..start + size as usize], u64::from(value), size as usize);
        for a in address..address + size {
            self.initialized[a as usize] = true;
        }
        Ok(())
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.write(address, 1, value as u32, false)
    }

    pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        self.write(address, 4, value, false)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_initialized(&self, address: u32) -> bool {
        self.initialized.get(address as usize).copied().unwrap_or(false)
    }
}

/// Section tags. `Snippet` only appears when no `SECTION` directive was
/// used in the source.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum SectionTag {
    Intvec,
    Code,
    Data,
    Snippet,
}

impl SectionTag {
    pub fn base_address(self) -> u32 {
        match self {
            SectionTag::Intvec => crate::constants::INTVEC_BASE,
            SectionTag::Code => crate::constants::CODE_BASE,
            SectionTag::Data => crate::constants::DATA_BASE,
            SectionTag::Snippet => crate::constants::SNIPPET_BASE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionTag::Intvec => "INTVEC",
            SectionTag::Code => "CODE",
            SectionTag::Data => "DATA",
            SectionTag::Snippet => "SNIPPET",
        }
    }
}

/// The simulator's whole address space: a handful of sections, each mapped
/// at a fixed base address, with no gaps permitted to straddle two sections.
#[derive(Debug, Default)]
pub struct Memory {
    sections: HashMap<SectionTag, (u32, Section)>, // (base address, bytes)
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    pub fn mount(&mut self, tag: SectionTag, base: u32, section: Section) {
        self.sections.insert(tag, (base, section));
    }

    pub fn section(&self, tag: SectionTag) -> Option<&Section> {
        self.sections.get(&tag).map(|(_, s)| s)
    }

    pub fn section_mut(&mut self, tag: SectionTag) -> Option<&mut Section> {
        self.sections.get_mut(&tag).map(|(_, s)| s)
    }

    pub fn has_section(&self, tag: SectionTag) -> bool {
        self.sections.contains_key(&tag)
    }

    /// Where execution begins: the start of `CODE`, or of the synthetic
    /// `SNIPPET` section when no `SECTION` directives were used. Falls
    /// back to address 0 for a memory with neither (e.g. an empty test
    /// fixture), matching the reset vector.
    pub fn entry_point(&self) -> u32 {
        if self.has_section(SectionTag::Snippet) {
            SectionTag::Snippet.base_address()
        } else if self.has_section(SectionTag::Code) {
            SectionTag::Code.base_address()
        } else {
            SectionTag::Intvec.base_address()
        }
    }

    fn locate(&self, address: u32) -> Option<(SectionTag, u32)> {
        self.sections.iter().find_map(|(tag, (base, section))| {
            if address >= *base && address < base + section.length() {
                Some((*tag, address - base))
            } else {
                None
            }
        })
    }

    fn locate_mut(&mut self, address: u32) -> Option<(u32, &mut Section)> {
        self.sections
            .values_mut()
            .find(|(base, section)| address >= *base && address < base + section.length())
            .map(|(base, section)| (*base, section))
    }

    pub fn read(&self, address: u32, size: u32, allow_uninitialized: bool) -> Result<u32, MemoryError> {
        let (tag, local) = self
            .locate(address)
            .ok_or(MemoryError::OutOfRange { address, size })?;
        self.section(tag)
            .expect("locate() only returns mounted tags")
            .read(local, size, allow_uninitialized)
    }

    pub fn write(&mut self, address: u32, size: u32, value: u32) -> Result<(), MemoryError> {
        let (base, section) = self
            .locate_mut(address)
            .ok_or(MemoryError::OutOfRange { address, size })?;
        section.write(address - base, size, value, false)
    }

    pub fn breakpoint_at(&self, address: u32) -> MemFlags {
        self.locate(address)
            .and_then(|(tag, local)| self.section(tag).map(|s| s.breakpoint_at(local)))
            .unwrap_or_else(MemFlags::empty)
    }

    pub fn set_breakpoint(&mut self, address: u32, flags: MemFlags) {
        if let Some((base, section)) = self.locate_mut(address) {
            section.set_breakpoint(address - base, flags);
        }
    }

    pub fn pending_breakpoint(&self, address: u32, size: u32, kind: MemFlags) -> Option<MemFlags> {
        let (tag, local) = self.locate(address)?;
        self.section(tag)?.pending_breakpoint(local, size, kind)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uninitialized_read_is_an_error() {
        let section = Section::new(4);
        assert!(matches!(
            section.read_word(0, false),
            Err(MemoryError::Uninitialized { .. })
        ));
        assert_eq!(section.read_word(0, true).unwrap(), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut section = Section::new(4);
        section.write_word(0, 0x1234_5678).unwrap();
        assert_eq!(section.read_word(0, false).unwrap(), 0x1234_5678);
    }

    #[test]
    fn byte_store_leaves_neighbours_unset() {
        let mut section = Section::new(4);
        section.write_byte(0, 0xAB).unwrap();
        assert_eq!(section.read_byte(0, false).unwrap(), 0xAB);
        assert!(section.read_byte(1, false).is_err());
    }

    #[test]
    fn memory_routes_to_the_right_section() {
        let mut mem = Memory::new();
        mem.mount(SectionTag::Code, 0x80, Section::new(16));
        mem.mount(SectionTag::Data, 0x1000, Section::new(16));
        mem.write(0x1000, 4, 0xCAFEBABE).unwrap();
        assert_eq!(mem.read(0x1000, 4, false).unwrap(), 0xCAFEBABE);
        assert!(mem.read(0x2000, 4, false).is_err());
    }

    #[test]
    fn entry_point_prefers_snippet_then_code_then_intvec() {
        let mut mem = Memory::new();
        assert_eq!(mem.entry_point(), SectionTag::Intvec.base_address());
        mem.mount(SectionTag::Code, SectionTag::Code.base_address(), Section::new(4));
        assert_eq!(mem.entry_point(), SectionTag::Code.base_address());
        mem.mount(SectionTag::Snippet, SectionTag::Snippet.base_address(), Section::new(4));
        assert_eq!(mem.entry_point(), SectionTag::Snippet.base_address());
    }
}
