//! Mapping LOAD segments into the address space.
//!
//! For a LOAD program header with virtual address `vaddr` and memory size
//! `memsz`, the mapping covers the pages spanned by the segment:
//!
//! ```text
//!   base = vaddr rounded down to a page        padding = vaddr - base
//!   |<----- padding ----->|<------------- memsz ------------->|
//!   +---------------------+-----------------------------------+
//!   |<------------------- len = memsz + padding ------------->|
//! ```
//!
//! The file offset is rounded down the same way, so the segment contents land
//! at `vaddr` as long as the image keeps offset and address congruent modulo
//! the page size.

use std::{
    os::fd::{AsRawFd as _, BorrowedFd},
    ptr,
};

use elf32_types::{ProgramHeader, SegmentFlags, SegmentType};
use nix::{
    errno::Errno,
    libc::{self, off_t},
    sys::mman::{MapFlags, ProtFlags},
};

use crate::{error::SegmentMapError, page::PageSize, segment_table::SegmentVisitor};

/// Derives the access protection of a segment from its flags.
///
/// Each of read, write and execute is granted independently; no flags at all
/// yields [`ProtFlags::PROT_NONE`].
#[must_use]
pub fn protection(flags: SegmentFlags) -> ProtFlags {
    let mut prot = ProtFlags::PROT_NONE;
    if flags.contains(SegmentFlags::R) {
        prot.insert(ProtFlags::PROT_READ);
    }
    if flags.contains(SegmentFlags::W) {
        prot.insert(ProtFlags::PROT_WRITE);
    }
    if flags.contains(SegmentFlags::X) {
        prot.insert(ProtFlags::PROT_EXEC);
    }
    prot
}

/// Parameters of the mapping for one LOAD segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    /// Page-aligned start address.
    pub base: usize,
    /// Distance from `base` to the segment's virtual address.
    pub padding: usize,
    /// Length of the mapping in bytes.
    pub len: usize,
    /// Page-aligned file offset backing `base`.
    pub file_offset: usize,
    pub prot: ProtFlags,
}

impl MapRequest {
    /// Computes the mapping for `ph`.
    ///
    /// Returns `None` if the length does not fit in the address space.
    #[must_use]
    pub fn for_segment(ph: &ProgramHeader, page_size: PageSize) -> Option<Self> {
        let vaddr = usize::try_from(ph.vaddr).ok()?;
        let offset = usize::try_from(ph.offset).ok()?;
        let memsz = usize::try_from(ph.memsz).ok()?;

        let padding = page_size.offset_in_page(vaddr);
        Some(Self {
            base: page_size.round_down(vaddr),
            padding,
            len: memsz.checked_add(padding)?,
            file_offset: page_size.round_down(offset),
            prot: protection(ph.segment_flags()),
        })
    }
}

/// Establishes file-backed mappings.
pub trait SegmentMapper {
    /// Maps `request.len` bytes of `fd` at `request.file_offset` to exactly
    /// `request.base`, returning the mapped address.
    ///
    /// Address zero is a valid target and a valid result.
    fn map(&mut self, fd: BorrowedFd<'_>, request: &MapRequest) -> Result<usize, Errno>;
}

/// Maps segments with a private, fixed-address `mmap`.
///
/// Whatever was mapped at the requested range before is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapMapper;

impl SegmentMapper for MmapMapper {
    fn map(&mut self, fd: BorrowedFd<'_>, request: &MapRequest) -> Result<usize, Errno> {
        let offset = off_t::try_from(request.file_offset).map_err(|_overflow| Errno::EOVERFLOW)?;
        // `nix::sys::mman::mmap` cannot return a mapping at address zero.
        let addr = unsafe {
            libc::mmap(
                ptr::without_provenance_mut(request.base),
                request.len,
                request.prot.bits(),
                (MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED).bits(),
                fd.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Errno::last());
        }
        Ok(addr.addr())
    }
}

/// A LOAD segment that was mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedSegment {
    /// Index of the program header in the table.
    pub index: usize,
    pub header: ProgramHeader,
    pub request: MapRequest,
    /// Address returned by the mapper.
    pub addr: usize,
}

/// Outcome of visiting every program header.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub mapped: Vec<MappedSegment>,
    pub failed: Vec<SegmentMapError>,
    /// Indices of LOAD segments with nothing to map.
    pub skipped: Vec<usize>,
}

impl LoadReport {
    /// Number of LOAD segments seen.
    #[must_use]
    pub fn load_segments(&self) -> usize {
        self.mapped.len() + self.failed.len() + self.skipped.len()
    }

    /// Returns `true` if no LOAD segment failed to map.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Maps every LOAD segment it visits.
///
/// A segment that cannot be mapped is logged and recorded; the remaining
/// segments are still attempted.
#[derive(Debug)]
pub struct SegmentLoader<'fd, 'm, M: ?Sized> {
    fd: BorrowedFd<'fd>,
    mapper: &'m mut M,
    page_size: PageSize,
    report: LoadReport,
}

impl<'fd, 'm, M> SegmentLoader<'fd, 'm, M>
where
    M: SegmentMapper + ?Sized,
{
    pub fn new(fd: BorrowedFd<'fd>, mapper: &'m mut M, page_size: PageSize) -> Self {
        Self {
            fd,
            mapper,
            page_size,
            report: LoadReport::default(),
        }
    }

    #[must_use]
    pub fn finish(self) -> LoadReport {
        self.report
    }

    fn fail(&mut self, index: usize, ph: &ProgramHeader, errno: Errno) {
        let err = SegmentMapError {
            index,
            vaddr: ph.vaddr,
            errno,
        };
        log::warn!("{err}");
        self.report.failed.push(err);
    }
}

impl<M> SegmentVisitor for SegmentLoader<'_, '_, M>
where
    M: SegmentMapper + ?Sized,
{
    fn visit(&mut self, index: usize, ph: &ProgramHeader) {
        if ph.segment_type() != SegmentType::Load {
            return;
        }

        let Some(request) = MapRequest::for_segment(ph, self.page_size) else {
            self.fail(index, ph, Errno::EOVERFLOW);
            return;
        };
        if request.len == 0 {
            log::debug!("segment {index}: nothing to map at {:#x}", ph.vaddr);
            self.report.skipped.push(index);
            return;
        }

        log::debug!(
            "segment {index}: base {:#x} len {:#x} offset {:#x} prot {:?}",
            request.base,
            request.len,
            request.file_offset,
            request.prot,
        );
        match self.mapper.map(self.fd, &request) {
            Ok(addr) => {
                log::debug!("segment {index}: mapped at {addr:#x}");
                self.report.mapped.push(MappedSegment {
                    index,
                    header: *ph,
                    request,
                    addr,
                });
            }
            Err(errno) => self.fail(index, ph, errno),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{fs::File, io::Write as _, num::NonZeroUsize, os::fd::AsFd as _};

    use nix::sys::mman;

    use super::*;

    /// Records every request and fails those whose base is listed.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingMapper {
        pub(crate) requests: Vec<MapRequest>,
        pub(crate) fail_at: Vec<(usize, Errno)>,
    }

    impl SegmentMapper for RecordingMapper {
        fn map(&mut self, _fd: BorrowedFd<'_>, request: &MapRequest) -> Result<usize, Errno> {
            self.requests.push(*request);
            match self.fail_at.iter().find(|(base, _)| *base == request.base) {
                Some(&(_, errno)) => Err(errno),
                None => Ok(request.base),
            }
        }
    }

    fn load(
        ty: SegmentType,
        flags: SegmentFlags,
        vaddr: u32,
        filesz: u32,
        memsz: u32,
    ) -> ProgramHeader {
        ProgramHeader {
            ty: ty as u32,
            offset: vaddr & 0xffff,
            vaddr,
            paddr: vaddr,
            filesz,
            memsz,
            flags: flags.bits(),
            align: 0x1000,
        }
    }

    fn run(mapper: &mut RecordingMapper, headers: &[ProgramHeader]) -> LoadReport {
        let file = File::open("/dev/null").unwrap();
        let mut loader = SegmentLoader::new(file.as_fd(), mapper, PageSize::DEFAULT);
        for (i, ph) in headers.iter().enumerate() {
            loader.visit(i, ph);
        }
        loader.finish()
    }

    #[test]
    fn protection_bits() {
        use SegmentFlags as F;

        assert_eq!(protection(F::empty()), ProtFlags::PROT_NONE);
        assert_eq!(protection(F::R), ProtFlags::PROT_READ);
        assert_eq!(protection(F::W), ProtFlags::PROT_WRITE);
        assert_eq!(protection(F::X), ProtFlags::PROT_EXEC);
        assert_eq!(
            protection(F::R | F::X),
            ProtFlags::PROT_READ | ProtFlags::PROT_EXEC
        );
        assert_eq!(
            protection(F::W | F::X),
            ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC
        );
        assert_eq!(
            protection(F::all()),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC
        );
        assert_eq!(
            protection(F::from_bits_retain(0xf000_0004)),
            ProtFlags::PROT_READ
        );
    }

    #[test]
    fn request_arithmetic() {
        let ph = ProgramHeader {
            offset: 0x1ff4,
            ..load(SegmentType::Load, SegmentFlags::R, 0x0804_9ff4, 0x10, 0x20)
        };
        let req = MapRequest::for_segment(&ph, PageSize::DEFAULT).unwrap();
        assert_eq!(req.base, 0x0804_9000);
        assert_eq!(req.padding, 0xff4);
        assert_eq!(req.len, 0x1014);
        assert_eq!(req.file_offset, 0x1000);
        assert_eq!(req.prot, ProtFlags::PROT_READ);
    }

    #[test]
    fn request_at_address_zero() {
        let ph = ProgramHeader {
            offset: 0,
            ..load(SegmentType::Load, SegmentFlags::R, 0, 0x10, 0x10)
        };
        let req = MapRequest::for_segment(&ph, PageSize::DEFAULT).unwrap();
        assert_eq!(req.base, 0);
        assert_eq!(req.padding, 0);
        assert_eq!(req.len, 0x10);
    }

    #[test]
    fn request_with_larger_pages() {
        let ph = load(SegmentType::Load, SegmentFlags::R, 0x0804_9ff4, 0x10, 0x20);
        let req = MapRequest::for_segment(&ph, PageSize::new(0x1_0000).unwrap()).unwrap();
        assert_eq!(req.base, 0x0804_0000);
        assert_eq!(req.padding, 0x9ff4);
        assert_eq!(req.len, 0xa014);
    }

    #[test]
    fn two_segment_image() {
        let text = load(
            SegmentType::Load,
            SegmentFlags::R | SegmentFlags::X,
            0x0804_8000,
            0x100,
            0x100,
        );
        let data = load(
            SegmentType::Load,
            SegmentFlags::R | SegmentFlags::W,
            0x0804_9ff4,
            0x10,
            0x20,
        );

        let mut mapper = RecordingMapper::default();
        let report = run(&mut mapper, &[text, data]);
        assert!(report.is_complete());
        assert_eq!(report.load_segments(), 2);

        let [a, b] = mapper.requests[..] else {
            panic!("expected two requests, got {:?}", mapper.requests);
        };
        assert_eq!(a.base, 0x0804_8000);
        assert_eq!(a.len, 0x100);
        assert_eq!(a.prot, ProtFlags::PROT_READ | ProtFlags::PROT_EXEC);
        assert_eq!(b.base, 0x0804_9000);
        assert_eq!(b.padding, 0xff4);
        assert_eq!(b.len, 0x1014);
        assert_eq!(b.prot, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE);

        assert_eq!(report.mapped[0].index, 0);
        assert_eq!(report.mapped[1].index, 1);
        assert_eq!(report.mapped[1].addr, 0x0804_9000);
    }

    #[test]
    fn other_types_are_ignored() {
        let headers = [
            load(SegmentType::Phdr, SegmentFlags::R, 0x0804_8034, 0xc0, 0xc0),
            load(SegmentType::Interp, SegmentFlags::R, 0x0804_80f4, 0x13, 0x13),
            load(SegmentType::Dynamic, SegmentFlags::R | SegmentFlags::W, 0x0804_9f0c, 0xf0, 0xf0),
            load(SegmentType::Note, SegmentFlags::R, 0x0804_8108, 0x44, 0x44),
            ProgramHeader {
                ty: 0x6474_e551,
                ..ProgramHeader::zero()
            },
        ];
        let mut mapper = RecordingMapper::default();
        let report = run(&mut mapper, &headers);
        assert!(mapper.requests.is_empty());
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn failure_does_not_stop_the_scan() {
        let headers = [
            load(SegmentType::Load, SegmentFlags::R | SegmentFlags::X, 0x0804_8000, 0x100, 0x100),
            load(SegmentType::Load, SegmentFlags::R, 0xffff_f000, 0x10, 0x10),
            load(SegmentType::Load, SegmentFlags::R | SegmentFlags::W, 0x0804_a000, 0x10, 0x20),
        ];
        let mut mapper = RecordingMapper {
            fail_at: vec![(0xffff_f000, Errno::ENOMEM)],
            ..RecordingMapper::default()
        };
        let report = run(&mut mapper, &headers);

        assert_eq!(mapper.requests.len(), 3);
        assert!(!report.is_complete());
        assert_eq!(
            report.failed,
            [SegmentMapError {
                index: 1,
                vaddr: 0xffff_f000,
                errno: Errno::ENOMEM,
            }]
        );
        let mapped = report.mapped.iter().map(|seg| seg.index).collect::<Vec<_>>();
        assert_eq!(mapped, [0, 2]);
    }

    #[test]
    fn empty_segment_is_not_mapped() {
        let headers = [
            load(SegmentType::Load, SegmentFlags::R, 0x0804_8000, 0, 0),
            load(SegmentType::Load, SegmentFlags::R, 0x0804_9010, 0, 0),
        ];
        let mut mapper = RecordingMapper::default();
        let report = run(&mut mapper, &headers);

        // Only the page-aligned empty segment has nothing to map; the other
        // still covers its padding.
        assert_eq!(report.skipped, [0]);
        assert_eq!(mapper.requests.len(), 1);
        assert_eq!(mapper.requests[0].len, 0x10);
    }

    #[test]
    fn segment_at_address_zero_reaches_the_mapper() {
        let headers = [load(SegmentType::Load, SegmentFlags::R, 0, 0x10, 0x10)];
        let mut mapper = RecordingMapper::default();
        let report = run(&mut mapper, &headers);

        assert_eq!(mapper.requests.len(), 1);
        assert_eq!(mapper.requests[0].base, 0);
        assert!(report.is_complete());
        assert_eq!(report.mapped[0].addr, 0);
    }

    #[test]
    fn mmap_at_address_zero() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0x5a; 0x10]).unwrap();
        let request = MapRequest {
            base: 0,
            padding: 0,
            len: 0x10,
            file_offset: 0,
            prot: ProtFlags::PROT_READ,
        };

        // Whether page zero may be mapped depends on privileges and
        // vm.mmap_min_addr; either outcome has to come back as a value.
        match MmapMapper.map(tmp.as_file().as_fd(), &request) {
            Ok(addr) => {
                assert_eq!(addr, 0);
                assert_eq!(unsafe { libc::munmap(ptr::null_mut(), 0x10) }, 0);
            }
            Err(errno) => assert!(matches!(errno, Errno::EPERM | Errno::EACCES), "{errno}"),
        }
    }

    #[test]
    fn maps_file_contents_at_the_requested_address() {
        use elf32_image_builder::ImageBuilder;

        const BASE: usize = 0x3000_0000;
        const VADDR: u32 = 0x3000_0010;

        // Claim the range first so MAP_FIXED cannot clobber anything of ours.
        let len = NonZeroUsize::new(0x2000).unwrap();
        let Ok(reserved) = (unsafe {
            mman::mmap_anonymous(
                NonZeroUsize::new(BASE),
                len,
                ProtFlags::PROT_NONE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_FIXED_NOREPLACE,
            )
        }) else {
            return;
        };
        if reserved.as_ptr().addr() != BASE {
            unsafe {
                mman::munmap(reserved, len.get()).unwrap();
            }
            return;
        }

        let builder = ImageBuilder::new(VADDR).segment(
            SegmentType::Load,
            SegmentFlags::R,
            VADDR,
            b"hello",
            0x20,
        );
        let tmp = tempfile::NamedTempFile::new().unwrap();
        builder.write_to(tmp.path()).unwrap();
        let file = File::open(tmp.path()).unwrap();

        let mut mapper = MmapMapper;
        let mut loader = SegmentLoader::new(file.as_fd(), &mut mapper, PageSize::DEFAULT);
        loader.visit(0, &builder.program_headers()[0]);
        let report = loader.finish();
        assert!(report.is_complete(), "{:?}", report.failed);
        assert_eq!(report.mapped[0].addr, BASE);

        let seen = unsafe { std::slice::from_raw_parts(VADDR as usize as *const u8, 5) };
        assert_eq!(seen, b"hello");

        unsafe {
            mman::munmap(reserved, len.get()).unwrap();
        }
    }
}
