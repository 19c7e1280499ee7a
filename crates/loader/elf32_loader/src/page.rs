//! Page granularity of segment mappings.

use std::{fmt, num::NonZeroUsize, str::FromStr};

use elf32_loader_params::DEFAULT_PAGE_SIZE;

/// A power-of-two page size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize(NonZeroUsize);

impl PageSize {
    /// [`DEFAULT_PAGE_SIZE`] bytes.
    pub const DEFAULT: Self = match Self::new(DEFAULT_PAGE_SIZE) {
        Some(size) => size,
        None => panic!("default page size must be a power of two"),
    };

    /// Returns `None` unless `size` is a power of two.
    #[must_use]
    pub const fn new(size: usize) -> Option<Self> {
        match NonZeroUsize::new(size) {
            Some(size) if size.is_power_of_two() => Some(Self(size)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    const fn mask(self) -> usize {
        self.get() - 1
    }

    /// Rounds `addr` down to the start of its page.
    #[must_use]
    pub const fn round_down(self, addr: usize) -> usize {
        addr & !self.mask()
    }

    /// Returns the distance of `addr` from the start of its page.
    #[must_use]
    pub const fn offset_in_page(self, addr: usize) -> usize {
        addr & self.mask()
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("page size must be a power of two, got '{0}'")]
pub struct ParsePageSizeError(String);

impl FromStr for PageSize {
    type Err = ParsePageSizeError;

    /// Parses a decimal or `0x`-prefixed hexadecimal page size.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => usize::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ParsePageSizeError(s.to_owned()))
    }
}
