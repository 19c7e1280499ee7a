#![no_std]

/// Page granularity used for segment alignment unless overridden.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Exit code for runs that end without loading anything but without failure,
/// such as an input that is not an ELF image.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for a wrong invocation.
pub const EXIT_USAGE: i32 = 1;

/// Exit code for failures to open, stat or map the image file.
pub const EXIT_IO: i32 = 2;

/// Exit code for a load whose control transfer could not be started.
pub const EXIT_TRANSFER: i32 = 3;

/// Environment variable selecting the maximum log level.
pub const ENV_LOG_LEVEL: &str = "ELFLOAD_LOG";

/// Environment variable overriding [`DEFAULT_PAGE_SIZE`].
pub const ENV_PAGE_SIZE: &str = "ELFLOAD_PAGE_SIZE";
