//! Human-readable program header listing.

use std::fmt;

use elf32_types::ProgramHeader;

use crate::segment_table::SegmentTable;

/// Column titles matching [`SegmentRow`].
#[derive(Debug, Clone, Copy)]
pub struct TableHeading;

impl fmt::Display for TableHeading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} {:<8} {:<10} {:<10} {:<7} {:<7} {:<3} {}",
            "Type", "Offset", "VirtAddr", "PhysAddr", "FileSiz", "MemSiz", "Flg", "Align"
        )
    }
}

/// One program header formatted as a table row.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRow<'a>(pub &'a ProgramHeader);

impl fmt::Display for SegmentRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ph = self.0;
        write!(
            f,
            "{:<8} 0x{:06x} 0x{:08x} 0x{:08x} 0x{:05x} 0x{:05x} {} 0x{:x}",
            ph.segment_type(),
            ph.offset,
            ph.vaddr,
            ph.paddr,
            ph.filesz,
            ph.memsz,
            ph.segment_flags(),
            ph.align,
        )
    }
}

/// The whole program header table, heading included.
#[derive(Debug, Clone, Copy)]
pub struct SegmentListing<'a, 'b>(pub &'b SegmentTable<'a>);

impl fmt::Display for SegmentListing<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TableHeading}")?;
        for (_, ph) in self.0.iter() {
            write!(f, "\n{}", SegmentRow(&ph))?;
        }
        Ok(())
    }
}
