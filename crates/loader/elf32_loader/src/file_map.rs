//! Read-only access to the image file.

use std::{
    ffi::c_void,
    fs::File,
    marker::PhantomData,
    num::NonZeroUsize,
    os::fd::{AsFd, BorrowedFd},
    path::{Path, PathBuf},
    ptr::NonNull,
    slice,
};

use nix::{
    errno::Errno,
    sys::mman::{self, MapFlags, ProtFlags},
};

use crate::error::{FormatError, IoOp, LoadError};

/// An image file opened for reading.
///
/// The descriptor stays open for as long as this value lives. Segment
/// mappings are backed by it, so it must outlive every access to them.
#[derive(Debug)]
pub struct ImageFile {
    file: File,
    path: PathBuf,
}

impl ImageFile {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|e| LoadError::io(IoOp::Open, path, &e))?;
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the size of the file in bytes.
    pub fn size(&self) -> Result<usize, LoadError> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| LoadError::io(IoOp::Stat, &self.path, &e))?;
        usize::try_from(meta.len()).map_err(|_overflow| LoadError::Io {
            op: IoOp::Stat,
            path: self.path.clone(),
            errno: Errno::EFBIG,
        })
    }

    /// Maps the whole file read-only.
    ///
    /// An empty file cannot be mapped and is reported as
    /// [`FormatError::Truncated`].
    pub fn map_view(&self) -> Result<FileView<'_>, LoadError> {
        let len = self.size()?;
        let Some(len) = NonZeroUsize::new(len) else {
            return Err(FormatError::Truncated { len: 0 }.into());
        };

        let ptr = unsafe {
            mman::mmap(
                None,
                len,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                &self.file,
                0,
            )
        }
        .map_err(|errno| LoadError::Io {
            op: IoOp::Map,
            path: self.path.clone(),
            errno,
        })?;
        log::debug!("mapped '{}' ({len} bytes) at {ptr:p}", self.path.display());

        Ok(FileView {
            ptr,
            len,
            _file: PhantomData,
        })
    }
}

impl AsFd for ImageFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// A read-only mapping of a whole [`ImageFile`].
///
/// Unmapped on drop.
#[derive(Debug)]
pub struct FileView<'file> {
    ptr: NonNull<c_void>,
    len: NonZeroUsize,
    _file: PhantomData<&'file ImageFile>,
}

impl FileView<'_> {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        // The mapping is PROT_READ, private and lives until `self` is dropped.
        unsafe { slice::from_raw_parts(self.ptr.cast::<u8>().as_ptr(), self.len.get()) }
    }
}

impl Drop for FileView<'_> {
    fn drop(&mut self) {
        if let Err(errno) = unsafe { mman::munmap(self.ptr, self.len.get()) } {
            log::warn!("cannot unmap file view at {:p}: {errno}", self.ptr);
        }
    }
}
