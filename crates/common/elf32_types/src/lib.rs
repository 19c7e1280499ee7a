//! On-disk layout of 32-bit ELF executables.
//!
//! ```text
//! offset 0                      ┌──────────────────────────┐
//!                               │ FileHeader (52 bytes)    │  ident[16] starts with ELF_MAGIC
//! offset FileHeader::phoff  ──▶ ├──────────────────────────┤
//!                               │ ProgramHeader[0]         │  32 bytes each,
//!                               │ ...                      │  FileHeader::phnum entries
//!                               │ ProgramHeader[phnum - 1] │
//!                               ├──────────────────────────┤
//!                               │ segment contents         │  located by ProgramHeader::offset
//!                               └──────────────────────────┘
//! ```
//!
//! All multi-byte fields are stored in the byte order of the machine that
//! produced the image. They are read natively; no conversion is done here.

#![cfg_attr(not(test), no_std)]

use core::fmt;

use bitflags::bitflags;
use dataview::Pod;
use strum::{FromRepr, IntoStaticStr};

/// Length of the identification prefix of the file header.
pub const EI_NIDENT: usize = 16;

/// The signature at the start of every ELF image.
pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

/// Index of the file class byte in the identification prefix.
pub const EI_CLASS: usize = 4;

/// File class of 32-bit objects.
pub const ELF_CLASS_32: u8 = 1;

/// File header.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub struct FileHeader {
    /// Identification prefix. Starts with [`ELF_MAGIC`].
    pub ident: [u8; EI_NIDENT],
    pub ty: u16,
    pub machine: u16,
    pub version: u32,
    /// Virtual address of the entry point.
    pub entry: u32,
    /// File offset of the program header table.
    pub phoff: u32,
    /// File offset of the section header table.
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    /// Size of one program header table entry.
    pub phentsize: u16,
    /// Number of program header table entries.
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

const _: () = assert!(size_of::<FileHeader>() == 52);

impl FileHeader {
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            ident: [0; EI_NIDENT],
            ty: 0,
            machine: 0,
            version: 0,
            entry: 0,
            phoff: 0,
            shoff: 0,
            flags: 0,
            ehsize: 0,
            phentsize: 0,
            phnum: 0,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        }
    }

    /// Returns `true` if the identification prefix starts with [`ELF_MAGIC`].
    #[must_use]
    pub fn has_magic(&self) -> bool {
        self.ident[..ELF_MAGIC.len()] == ELF_MAGIC
    }

    /// Returns the file class byte of the identification prefix.
    #[must_use]
    pub const fn class(&self) -> u8 {
        self.ident[EI_CLASS]
    }
}

/// Program header.
///
/// Describes one segment of the image.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub struct ProgramHeader {
    /// Raw segment type. See [`SegmentType`].
    pub ty: u32,
    /// File offset of the segment contents.
    pub offset: u32,
    pub vaddr: u32,
    /// Physical address. Informational only.
    pub paddr: u32,
    /// Size of the segment contents in the file.
    pub filesz: u32,
    /// Size of the segment in memory.
    pub memsz: u32,
    /// Raw permission flags. See [`SegmentFlags`].
    pub flags: u32,
    pub align: u32,
}

const _: () = assert!(size_of::<ProgramHeader>() == 32);

impl ProgramHeader {
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            ty: 0,
            offset: 0,
            vaddr: 0,
            paddr: 0,
            filesz: 0,
            memsz: 0,
            flags: 0,
            align: 0,
        }
    }

    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        SegmentType::from_raw(self.ty)
    }

    #[must_use]
    pub const fn segment_flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_retain(self.flags)
    }
}

/// Segment type of a program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[repr(u32)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SegmentType {
    Null = 0,
    /// Loadable segment.
    Load = 1,
    /// Dynamic linking information.
    Dynamic = 2,
    /// Path of the program interpreter.
    Interp = 3,
    Note = 4,
    Shlib = 5,
    /// The program header table itself.
    Phdr = 6,
    /// Any type code not listed above.
    Unknown = u32::MAX,
}

impl SegmentType {
    /// Classifies a raw type code.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self::from_repr(raw).unwrap_or(Self::Unknown)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

bitflags! {
    /// Permission flags of a program header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u32 {
        /// Segment is executable.
        const X = 1 << 0;
        /// Segment is writable.
        const W = 1 << 1;
        /// Segment is readable.
        const R = 1 << 2;
    }
}

impl fmt::Display for SegmentFlags {
    /// Formats the flags as a fixed-width `RWE` column, blank for unset bits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column = |flag, c| if self.contains(flag) { c } else { ' ' };
        write!(
            f,
            "{}{}{}",
            column(Self::R, 'R'),
            column(Self::W, 'W'),
            column(Self::X, 'E'),
        )
    }
}
