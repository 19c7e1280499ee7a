macro_rules! message {
    ($($msg:tt)*) => {
        {
            let prog = $crate::arg0();
            ::std::eprintln!("{prog}: {msg}", msg = ::core::format_args!($($msg)*));
        }
    }
}

macro_rules! message_err {
    ($e:expr) => {
        {
            let prog = $crate::arg0();
            ::std::eprintln!("{prog}: {e}", e = $e);
        }
    };
    ($e:expr, $($msg:tt)*) => {
        {
            let prog = $crate::arg0();
            ::std::eprintln!("{prog}: {msg}: {e}", msg = ::core::format_args!($($msg)*), e = $e);
        }
    };
}

macro_rules! exit_err {
    ($code:expr, $e:expr) => {
        {
            $crate::macros::message_err!($e);
            ::std::process::exit($code);
        }
    };
    ($code:expr, $e:expr, $($msg:tt)*) => {
        {
            $crate::macros::message_err!($e, $($msg)*);
            ::std::process::exit($code);
        }
    };
}

macro_rules! usage_and_exit {
    ($($args:tt)*) => {
        {
            let prog = $crate::arg0();
            ::std::eprintln!("Usage: {prog} {args}", args = ::core::format_args!($($args)*));
            ::std::process::exit(::elf32_loader_params::EXIT_USAGE);
        }
    };
}

pub(crate) use {exit_err, message, message_err, usage_and_exit};
