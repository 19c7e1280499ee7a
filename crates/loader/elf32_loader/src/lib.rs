//! User-space loader for 32-bit ELF executables.
//!
//! Loading an image goes through these steps:
//!
//! 1. The file is opened and mapped read-only as a whole ([`ImageFile`]).
//! 2. The file header is validated ([`ImageHeader`]).
//! 3. The program header table is located ([`SegmentTable`]) and every entry
//!    is visited in table order.
//! 4. Each LOAD entry is mapped privately at its fixed address with the
//!    protection its flags ask for ([`SegmentLoader`]). A segment that cannot
//!    be mapped does not stop the load; it ends up in the [`LoadReport`].
//! 5. The whole-file view is released. The descriptor is not: it backs the
//!    segment mappings and stays open inside the [`LoadedImage`].
//!
//! The loaded image is then entered through a [`Trampoline`].

use std::{ffi::c_int, os::fd::AsFd as _, path::Path};

pub use self::{
    error::{FormatError, IoOp, LoadError, SegmentMapError, TransferError},
    file_map::{FileView, ImageFile},
    header::ImageHeader,
    listing::{SegmentListing, SegmentRow, TableHeading},
    page::{PageSize, ParsePageSizeError},
    segment_loader::{
        LoadReport, MapRequest, MappedSegment, MmapMapper, SegmentLoader, SegmentMapper,
        protection,
    },
    segment_table::{SegmentTable, SegmentVisitor},
    transfer::{EntryPoint, ForwardedArgs, NativeTrampoline, Trampoline},
};

mod error;
mod file_map;
mod header;
mod listing;
mod page;
mod segment_loader;
mod segment_table;
mod transfer;

/// Tunables of a load.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    page_size: PageSize,
}

impl LoadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the granularity used to align segment mappings.
    #[must_use]
    pub const fn page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// An image whose segments have been mapped.
///
/// Owns the image file; the mappings stay in place after this value is
/// dropped.
#[derive(Debug)]
pub struct LoadedImage {
    file: ImageFile,
    entry: u32,
    report: LoadReport,
}

impl LoadedImage {
    /// Entry point address from the file header.
    #[must_use]
    pub const fn entry(&self) -> u32 {
        self.entry
    }

    #[must_use]
    pub fn mapped_segments(&self) -> &[MappedSegment] {
        &self.report.mapped
    }

    #[must_use]
    pub fn failed_segments(&self) -> &[SegmentMapError] {
        &self.report.failed
    }

    /// Indices of LOAD segments that had nothing to map.
    #[must_use]
    pub fn skipped_segments(&self) -> &[usize] {
        &self.report.skipped
    }

    /// Number of LOAD entries in the program header table.
    #[must_use]
    pub fn load_segment_count(&self) -> usize {
        self.report.load_segments()
    }

    /// Returns `true` if every LOAD segment was mapped.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.report.is_complete()
    }

    /// Enters the image through `trampoline`.
    ///
    /// The image file stays open until the trampoline returns.
    ///
    /// # Safety
    ///
    /// Runs foreign code at the entry address; see [`Trampoline::enter`].
    pub unsafe fn transfer<T>(
        self,
        args: &ForwardedArgs,
        trampoline: &mut T,
    ) -> Result<c_int, TransferError>
    where
        T: Trampoline + ?Sized,
    {
        let entry = EntryPoint::new(self.entry)?;
        log::debug!(
            "entering '{}' at {entry} with {} argument(s)",
            self.file.path().display(),
            args.argc()
        );
        let status = unsafe { trampoline.enter(args, entry) };
        drop(self);
        status
    }
}

/// Loads the image at `path` into the current process.
pub fn load(path: &Path, options: &LoadOptions) -> Result<LoadedImage, LoadError> {
    load_with(path, options, &mut MmapMapper, |_, _| {})
}

/// Loads the image at `path`, mapping segments with `mapper`.
///
/// `inspect` sees the validated header and program header table before any
/// segment is mapped.
pub fn load_with<M, F>(
    path: &Path,
    options: &LoadOptions,
    mapper: &mut M,
    inspect: F,
) -> Result<LoadedImage, LoadError>
where
    M: SegmentMapper + ?Sized,
    F: FnOnce(&ImageHeader, &SegmentTable<'_>),
{
    let file = ImageFile::open(path)?;
    let view = file.map_view()?;

    let header = ImageHeader::parse(view.bytes())?;
    let table = SegmentTable::locate(view.bytes(), &header)?;
    inspect(&header, &table);

    let mut loader = SegmentLoader::new(file.as_fd(), mapper, options.page_size);
    table.for_each(&mut loader);
    let report = loader.finish();
    drop(view);

    Ok(LoadedImage {
        entry: header.entry(),
        file,
        report,
    })
}
