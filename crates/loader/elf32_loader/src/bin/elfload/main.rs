use std::{
    env,
    io::{self, Write as _},
    path::{Path, PathBuf},
    process,
    sync::OnceLock,
};

use elf32_loader::{
    ForwardedArgs, LoadError, LoadOptions, MmapMapper, NativeTrampoline, SegmentListing,
    SegmentRow,
};
use elf32_loader_params::{EXIT_IO, EXIT_SUCCESS, EXIT_TRANSFER, EXIT_USAGE};

use self::{
    config::Config,
    macros::{exit_err, message, usage_and_exit},
    traits::OrExit as _,
};

mod config;
mod logger;
mod macros;
mod traits;

fn arg0() -> &'static str {
    static ARG0: OnceLock<String> = OnceLock::new();
    ARG0.get_or_init(|| {
        env::args_os()
            .next()
            .map_or_else(|| "elfload".into(), |arg| Path::new(&arg).display().to_string())
    })
}

fn main() {
    let args = env::args_os().collect::<Vec<_>>();
    let [_, path] = &args[..] else {
        usage_and_exit!("<ELF file>");
    };
    let path = PathBuf::from(path);

    let config = Config::from_env().or_exit(|e| exit_err!(EXIT_USAGE, e));
    if let Err(e) = logger::init(config.log_level) {
        message!("cannot install logger: {e}");
    }

    let options = LoadOptions::new().page_size(config.page_size);
    let image = match elf32_loader::load_with(&path, &options, &mut MmapMapper, |_, table| {
        println!("{}", SegmentListing(table));
    }) {
        Ok(image) => image,
        Err(LoadError::Format(e)) => {
            println!("{e}");
            process::exit(EXIT_SUCCESS);
        }
        Err(e @ LoadError::Io { .. }) => exit_err!(EXIT_IO, e),
    };

    println!();
    for seg in image.mapped_segments() {
        println!("{}", SegmentRow(&seg.header));
    }
    if !image.skipped_segments().is_empty() {
        log::info!("{} empty LOAD segment(s) not mapped", image.skipped_segments().len());
    }
    if !image.is_complete() {
        log::warn!(
            "{} of {} LOAD segments failed to map",
            image.failed_segments().len(),
            image.load_segment_count()
        );
    }

    let forwarded = ForwardedArgs::from_invocation(args)
        .or_exit(|e| exit_err!(EXIT_TRANSFER, e, "cannot forward arguments"));

    println!("Starting program at address 0x{:x}...", image.entry());
    io::stdout()
        .flush()
        .or_exit(|e| exit_err!(EXIT_IO, e, "cannot write to standard output"));

    match unsafe { image.transfer(&forwarded, &mut NativeTrampoline) } {
        Ok(status) => {
            log::debug!("'{}' returned {status}", path.display());
            println!("Program finished.");
        }
        Err(e) => exit_err!(EXIT_TRANSFER, e, "cannot start '{}'", path.display()),
    }
}
