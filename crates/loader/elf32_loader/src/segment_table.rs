//! Walking the program header table.

use dataview::DataView;
use elf32_types::ProgramHeader;

use crate::{error::FormatError, header::ImageHeader};

const PHDR_SIZE: usize = size_of::<ProgramHeader>();

/// Receives program headers in table order.
pub trait SegmentVisitor {
    fn visit(&mut self, index: usize, header: &ProgramHeader);
}

impl<F> SegmentVisitor for F
where
    F: FnMut(usize, &ProgramHeader),
{
    fn visit(&mut self, index: usize, header: &ProgramHeader) {
        self(index, header);
    }
}

/// The program header table of an image.
///
/// Borrows the bytes of the table; holds no other state.
#[derive(Debug, Clone, Copy)]
pub struct SegmentTable<'a> {
    bytes: &'a [u8],
    count: usize,
}

impl<'a> SegmentTable<'a> {
    /// Locates the table described by `header` inside `image`.
    ///
    /// Entries are `size_of::<ProgramHeader>()` bytes apart regardless of the
    /// header's `phentsize`.
    pub fn locate(image: &'a [u8], header: &ImageHeader) -> Result<Self, FormatError> {
        let out_of_bounds = FormatError::TableOutOfBounds {
            offset: header.phoff(),
            count: header.phnum(),
            len: image.len(),
        };

        let count = usize::from(header.phnum());
        let bytes = usize::try_from(header.phoff())
            .ok()
            .zip(count.checked_mul(PHDR_SIZE))
            .and_then(|(start, size)| Some(start..start.checked_add(size)?))
            .and_then(|range| image.get(range))
            .ok_or(out_of_bounds)?;

        if count > 0 && usize::from(header.phentsize()) != PHDR_SIZE {
            log::warn!(
                "program header entry size is {}, expected {PHDR_SIZE}",
                header.phentsize()
            );
        }

        Ok(Self { bytes, count })
    }

    /// Number of program headers.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the program header at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ProgramHeader> {
        if index >= self.count {
            return None;
        }
        DataView::from(self.bytes).try_read::<ProgramHeader>(index * PHDR_SIZE)
    }

    /// Iterates over `(index, header)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, ProgramHeader)> + use<'a> {
        let table = *self;
        (0..table.count).filter_map(move |i| Some((i, table.get(i)?)))
    }

    /// Calls `visitor` once for every program header, in table order.
    pub fn for_each<V>(&self, visitor: &mut V)
    where
        V: SegmentVisitor + ?Sized,
    {
        for (index, header) in self.iter() {
            visitor.visit(index, &header);
        }
    }
}
