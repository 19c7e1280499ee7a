//! Validation of the ELF file header.

use dataview::DataView;
use elf32_types::{EI_NIDENT, ELF_CLASS_32, ELF_MAGIC, FileHeader};

use crate::error::FormatError;

/// A file header whose signature has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    raw: FileHeader,
}

impl ImageHeader {
    /// Parses the file header at the start of `bytes`.
    ///
    /// Only the signature is validated. The class byte is checked too, but a
    /// mismatch is only logged.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let Some(ident) = bytes.get(..EI_NIDENT) else {
            return Err(FormatError::Truncated { len: bytes.len() });
        };
        if ident[..ELF_MAGIC.len()] != ELF_MAGIC {
            return Err(FormatError::BadMagic);
        }

        let raw = DataView::from(bytes)
            .try_read::<FileHeader>(0)
            .ok_or(FormatError::Truncated { len: bytes.len() })?;
        if raw.class() != ELF_CLASS_32 {
            log::warn!(
                "unexpected ELF class {}, reading the image as 32-bit anyway",
                raw.class()
            );
        }

        Ok(Self { raw })
    }

    /// Virtual address of the entry point.
    #[must_use]
    pub const fn entry(&self) -> u32 {
        self.raw.entry
    }

    /// File offset of the program header table.
    #[must_use]
    pub const fn phoff(&self) -> u32 {
        self.raw.phoff
    }

    /// Number of program headers.
    #[must_use]
    pub const fn phnum(&self) -> u16 {
        self.raw.phnum
    }

    #[must_use]
    pub const fn phentsize(&self) -> u16 {
        self.raw.phentsize
    }
}

#[cfg(test)]
mod tests {
    use elf32_image_builder::ImageBuilder;
    use elf32_types::{SegmentFlags, SegmentType};

    use super::*;

    #[test]
    fn parses_fields() {
        let img = ImageBuilder::new(0x0804_8054)
            .segment(SegmentType::Load, SegmentFlags::R, 0x0804_8000, &[0; 16], 16)
            .segment(SegmentType::Note, SegmentFlags::R, 0x0804_8010, &[0; 4], 4)
            .build();
        let header = ImageHeader::parse(&img).unwrap();
        assert_eq!(header.entry(), 0x0804_8054);
        assert_eq!(header.phoff(), 52);
        assert_eq!(header.phnum(), 2);
        assert_eq!(header.phentsize(), 32);
    }

    #[test]
    fn rejects_bad_magic() {
        let img = ImageBuilder::new(0).magic(*b"MZ\x90\x00").build();
        assert_eq!(ImageHeader::parse(&img), Err(FormatError::BadMagic));
        assert_eq!(
            ImageHeader::parse(b"#!/bin/sh\necho hello\n"),
            Err(FormatError::BadMagic)
        );
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(
            ImageHeader::parse(b"\x7fELF"),
            Err(FormatError::Truncated { len: 4 })
        );
        let img = ImageBuilder::new(0).truncate(40).build();
        assert_eq!(
            ImageHeader::parse(&img),
            Err(FormatError::Truncated { len: 40 })
        );
    }

    #[test]
    fn other_class_is_still_parsed() {
        let img = ImageBuilder::new(0x1000).class(2).build();
        let header = ImageHeader::parse(&img).unwrap();
        assert_eq!(header.entry(), 0x1000);
    }
}
