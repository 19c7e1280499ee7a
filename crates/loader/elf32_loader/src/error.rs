use std::{ffi::NulError, io, path::PathBuf};

use nix::errno::Errno;

/// The system call that failed while accessing the image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum IoOp {
    Open,
    Stat,
    Map,
}

/// Errors that abort a load before any segment is mapped.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot {op} '{}': {errno}", .path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        errno: Errno,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
}

impl LoadError {
    pub(crate) fn io(op: IoOp, path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            errno: errno_of(err),
        }
    }

    /// Returns the OS error code of an I/O failure.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Io { errno, .. } => Some(*errno),
            Self::Format(_) => None,
        }
    }
}

/// The input is not a loadable ELF32 image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Not an ELF file")]
    BadMagic,
    #[error("file is too short for an ELF header ({len} bytes)")]
    Truncated { len: usize },
    #[error(
        "program header table ({count} entries at offset {offset:#x}) lies outside the file ({len} bytes)"
    )]
    TableOutOfBounds { offset: u32, count: u16, len: usize },
}

/// A LOAD segment could not be mapped.
///
/// Not fatal to the load; collected in the load report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("failed to map segment at {vaddr:#x}: {errno:?}")]
pub struct SegmentMapError {
    /// Index of the program header in the table.
    pub index: usize,
    pub vaddr: u32,
    #[source]
    pub errno: Errno,
}

/// Control could not be handed to the loaded image.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("cannot run a 32-bit x86 image on a {arch} host")]
    UnsupportedHost { arch: &'static str },
    #[error("entry point address is zero")]
    NullEntry,
    #[error("argument contains a NUL byte")]
    InvalidArgument(#[from] NulError),
    #[error("too many arguments")]
    TooManyArguments,
}

fn errno_of(err: &io::Error) -> Errno {
    err.raw_os_error().map_or(Errno::UnknownErrno, Errno::from_raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_errno() {
        let err = LoadError::io(
            IoOp::Open,
            "/no/such/file",
            &io::Error::from_raw_os_error(Errno::ENOENT as i32),
        );
        assert_eq!(err.errno(), Some(Errno::ENOENT));
        let msg = err.to_string();
        assert!(msg.starts_with("cannot open '/no/such/file': ENOENT"), "{msg}");
    }

    #[test]
    fn io_error_without_os_code() {
        let err = LoadError::io(IoOp::Stat, "x", &io::Error::other("synthetic"));
        assert_eq!(err.errno(), Some(Errno::UnknownErrno));
    }

    #[test]
    fn segment_error_message() {
        let err = SegmentMapError {
            index: 3,
            vaddr: 0x0804_9ff4,
            errno: Errno::EPERM,
        };
        assert_eq!(err.to_string(), "failed to map segment at 0x8049ff4: EPERM");
    }

    #[test]
    fn format_error_is_not_io() {
        let err = LoadError::from(FormatError::BadMagic);
        assert_eq!(err.errno(), None);
        assert_eq!(err.to_string(), "Not an ELF file");
    }
}
