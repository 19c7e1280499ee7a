//! Handing control to the loaded image.
//!
//! The jump itself is done by a small routine outside of Rust's control:
//!
//! ```text
//! int elf32_loader_startup(int argc, char **argv, void (*entry)(void));
//! ```
//!
//! It builds a process-like stack (`argc`, then `argv[0..=argc]`), calls
//! `entry`, and returns whatever the image leaves in the return register if
//! it ever returns. Everything else in this module prepares its arguments.

use std::{
    ffi::{CString, OsString, c_char, c_int},
    fmt,
    num::NonZeroUsize,
    os::unix::ffi::OsStringExt as _,
    ptr,
};

use crate::error::TransferError;

/// Entry point address of a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint(NonZeroUsize);

impl EntryPoint {
    /// Fails with [`TransferError::NullEntry`] if `addr` is zero.
    pub fn new(addr: u32) -> Result<Self, TransferError> {
        usize::try_from(addr)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or(TransferError::NullEntry)
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

/// The argument vector passed on to the loaded image.
///
/// Built from the loader's own invocation with its first element (the
/// loader's name) removed, so the image sees its own path as `argv[0]`.
#[derive(Debug)]
pub struct ForwardedArgs {
    args: Vec<CString>,
    // Points into `args`; the last element is NULL.
    argv: Vec<*const c_char>,
    argc: c_int,
}

impl ForwardedArgs {
    pub fn from_invocation<I>(invocation: I) -> Result<Self, TransferError>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let args = invocation
            .into_iter()
            .skip(1)
            .map(|arg| CString::new(arg.into().into_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        let argc =
            c_int::try_from(args.len()).map_err(|_overflow| TransferError::TooManyArguments)?;
        let argv = args
            .iter()
            .map(|arg| arg.as_ptr())
            .chain([ptr::null()])
            .collect();
        Ok(Self { args, argv, argc })
    }

    #[must_use]
    pub const fn argc(&self) -> c_int {
        self.argc
    }

    /// NULL-terminated pointer vector, valid while `self` lives.
    #[must_use]
    pub fn argv(&self) -> *const *const c_char {
        self.argv.as_ptr()
    }

    #[must_use]
    pub fn args(&self) -> &[CString] {
        &self.args
    }
}

/// Transfers control to an entry point.
pub trait Trampoline {
    /// Runs the image at `entry` with `args`.
    ///
    /// Returns the image's status if it returns at all.
    ///
    /// # Safety
    ///
    /// `entry` must be the address of code that is mapped executable and
    /// follows the calling convention of the trampoline. Anything the image
    /// does to the process is outside of the caller's control.
    unsafe fn enter(
        &mut self,
        args: &ForwardedArgs,
        entry: EntryPoint,
    ) -> Result<c_int, TransferError>;
}

/// The trampoline of the host.
///
/// Only a 32-bit x86 host can run a 32-bit x86 image in-process. Elsewhere
/// [`TransferError::UnsupportedHost`] is returned and nothing is called.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeTrampoline;

impl Trampoline for NativeTrampoline {
    #[cfg(target_arch = "x86")]
    unsafe fn enter(
        &mut self,
        args: &ForwardedArgs,
        entry: EntryPoint,
    ) -> Result<c_int, TransferError> {
        Ok(unsafe { x86::elf32_loader_startup(args.argc(), args.argv(), entry.addr()) })
    }

    #[cfg(not(target_arch = "x86"))]
    unsafe fn enter(
        &mut self,
        _args: &ForwardedArgs,
        _entry: EntryPoint,
    ) -> Result<c_int, TransferError> {
        Err(TransferError::UnsupportedHost {
            arch: std::env::consts::ARCH,
        })
    }
}

#[cfg(target_arch = "x86")]
mod x86 {
    use core::arch::naked_asm;
    use std::ffi::{c_char, c_int};

    #[unsafe(naked)]
    pub(super) unsafe extern "C" fn elf32_loader_startup(
        argc: c_int,
        argv: *const *const c_char,
        entry: usize,
    ) -> c_int {
        naked_asm!(
            "push ebp",
            "mov ebp, esp",
            "push ebx",
            "push esi",
            "push edi",
            "mov ecx, [ebp + 8]",
            "mov esi, [ebp + 12]",
            // keep the stack 16-byte aligned at the call:
            // argc + 1 pointers and argc itself are pushed below
            "lea eax, [ecx * 4 + 8]",
            "mov edx, esp",
            "sub edx, eax",
            "and edx, 15",
            "sub esp, edx",
            // argv[argc] (NULL) first, argv[0] last
            "mov eax, ecx",
            "2:",
            "push dword ptr [esi + eax * 4]",
            "dec eax",
            "jns 2b",
            "push ecx",
            "call dword ptr [ebp + 16]",
            "lea esp, [ebp - 12]",
            "pop edi",
            "pop esi",
            "pop ebx",
            "pop ebp",
            "ret",
        )
    }
}
