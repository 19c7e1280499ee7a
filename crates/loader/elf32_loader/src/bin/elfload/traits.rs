use std::convert::Infallible;

/// Unwraps a result, or leaves the process through `exit` on error.
pub(crate) trait OrExit<T, E> {
    fn or_exit(self, exit: impl FnOnce(E) -> Infallible) -> T;
}

impl<T, E> OrExit<T, E> for Result<T, E> {
    fn or_exit(self, exit: impl FnOnce(E) -> Infallible) -> T {
        self.unwrap_or_else(|e| match exit(e) {})
    }
}
