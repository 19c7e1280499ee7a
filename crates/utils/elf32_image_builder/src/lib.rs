//! Writer for synthetic 32-bit ELF images.
//!
//! The produced layout is the file header, immediately followed by the
//! program header table, followed by the contents of every segment. Segment
//! contents are placed at a file offset congruent to the segment's virtual
//! address modulo the page size, so a loader can map them page by page.

use std::{fs, io, path::Path};

use dataview::{Pod, PodMethods as _};
use elf32_loader_params::DEFAULT_PAGE_SIZE;
use elf32_types::{
    ELF_CLASS_32, ELF_MAGIC, FileHeader, ProgramHeader, SegmentFlags, SegmentType,
};

const EHDR_SIZE: usize = size_of::<FileHeader>();
const PHDR_SIZE: usize = size_of::<ProgramHeader>();

/// `e_type` of an executable file.
const ET_EXEC: u16 = 2;
/// `e_machine` of Intel 80386.
const EM_386: u16 = 3;
const EV_CURRENT: u8 = 1;
const ELF_DATA_2LSB: u8 = 1;

#[derive(Debug, Clone)]
struct Segment {
    header: ProgramHeader,
    contents: Vec<u8>,
    fixed_offset: bool,
}

/// Builds an ELF32 image in memory.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    header: FileHeader,
    segments: Vec<Segment>,
    phoff: Option<u32>,
    phnum: Option<u16>,
    truncate: Option<usize>,
}

impl ImageBuilder {
    /// Creates a builder for an executable with the given entry address.
    #[must_use]
    pub fn new(entry: u32) -> Self {
        let mut header = FileHeader::zero();
        header.ident[..ELF_MAGIC.len()].copy_from_slice(&ELF_MAGIC);
        header.ident[4] = ELF_CLASS_32;
        header.ident[5] = ELF_DATA_2LSB;
        header.ident[6] = EV_CURRENT;
        header.ty = ET_EXEC;
        header.machine = EM_386;
        header.version = u32::from(EV_CURRENT);
        header.entry = entry;
        header.ehsize = u16::try_from(EHDR_SIZE).unwrap();
        header.phentsize = u16::try_from(PHDR_SIZE).unwrap();
        Self {
            header,
            segments: vec![],
            phoff: None,
            phnum: None,
            truncate: None,
        }
    }

    /// Appends a segment whose file offset is chosen by the builder.
    ///
    /// `filesz` is the length of `contents`.
    #[must_use]
    pub fn segment(
        mut self,
        ty: SegmentType,
        flags: SegmentFlags,
        vaddr: u32,
        contents: &[u8],
        memsz: u32,
    ) -> Self {
        self.segments.push(Segment {
            header: ProgramHeader {
                ty: ty as u32,
                offset: 0,
                vaddr,
                paddr: vaddr,
                filesz: u32::try_from(contents.len()).unwrap(),
                memsz,
                flags: flags.bits(),
                align: u32::try_from(DEFAULT_PAGE_SIZE).unwrap(),
            },
            contents: contents.to_vec(),
            fixed_offset: false,
        });
        self
    }

    /// Appends a program header verbatim, without any segment contents.
    #[must_use]
    pub fn program_header(mut self, header: ProgramHeader) -> Self {
        self.segments.push(Segment {
            header,
            contents: vec![],
            fixed_offset: true,
        });
        self
    }

    #[must_use]
    pub fn entry(mut self, entry: u32) -> Self {
        self.header.entry = entry;
        self
    }

    /// Overwrites the signature bytes of the identification prefix.
    #[must_use]
    pub fn magic(mut self, magic: [u8; 4]) -> Self {
        self.header.ident[..4].copy_from_slice(&magic);
        self
    }

    /// Overwrites the class byte of the identification prefix.
    #[must_use]
    pub fn class(mut self, class: u8) -> Self {
        self.header.ident[4] = class;
        self
    }

    /// Records `phoff` in the file header instead of the real table offset.
    #[must_use]
    pub fn phoff(mut self, phoff: u32) -> Self {
        self.phoff = Some(phoff);
        self
    }

    /// Records `phnum` in the file header instead of the real entry count.
    #[must_use]
    pub fn phnum(mut self, phnum: u16) -> Self {
        self.phnum = Some(phnum);
        self
    }

    /// Cuts the produced image to `len` bytes.
    #[must_use]
    pub fn truncate(mut self, len: usize) -> Self {
        self.truncate = Some(len);
        self
    }

    /// Returns the program headers as they will be written.
    #[must_use]
    pub fn program_headers(&self) -> Vec<ProgramHeader> {
        self.layout().1
    }

    fn layout(&self) -> (FileHeader, Vec<ProgramHeader>) {
        let mut header = self.header;
        let table_offset = EHDR_SIZE;
        header.phoff = self
            .phoff
            .unwrap_or_else(|| u32::try_from(table_offset).unwrap());
        header.phnum = self
            .phnum
            .unwrap_or_else(|| u16::try_from(self.segments.len()).unwrap());

        let mut cursor = table_offset + PHDR_SIZE * self.segments.len();
        let phdrs = self
            .segments
            .iter()
            .map(|seg| {
                let mut ph = seg.header;
                if !seg.fixed_offset {
                    let offset = congruent_offset(cursor, usize::try_from(ph.vaddr).unwrap());
                    ph.offset = u32::try_from(offset).unwrap();
                    cursor = offset + seg.contents.len();
                }
                ph
            })
            .collect();
        (header, phdrs)
    }

    /// Produces the image bytes.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let (header, phdrs) = self.layout();

        let mut img = vec![];
        write_at(&mut img, 0, &header);
        for (i, ph) in phdrs.iter().enumerate() {
            write_at(&mut img, EHDR_SIZE + i * PHDR_SIZE, ph);
        }
        for (seg, ph) in self.segments.iter().zip(&phdrs) {
            if !seg.contents.is_empty() {
                write_at(&mut img, usize::try_from(ph.offset).unwrap(), &seg.contents[..]);
            }
        }

        if let Some(len) = self.truncate {
            img.truncate(len);
        }
        img
    }

    /// Writes the image to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.build())
    }
}

/// Returns the smallest offset not below `cursor` that is congruent to
/// `vaddr` modulo the page size.
fn congruent_offset(cursor: usize, vaddr: usize) -> usize {
    let page_offset = vaddr % DEFAULT_PAGE_SIZE;
    let base = cursor - cursor % DEFAULT_PAGE_SIZE + page_offset;
    if base >= cursor {
        base
    } else {
        base + DEFAULT_PAGE_SIZE
    }
}

fn write_at<T>(img: &mut Vec<u8>, offset: usize, data: &T)
where
    T: Pod + ?Sized,
{
    let data = data.as_bytes();
    let end = offset + data.len();
    if img.len() < end {
        img.resize(end, 0);
    }
    img[offset..end].copy_from_slice(data);
}
