//! Message-only error context shared by the courier crates.

/// An error type that can be built from a single human-readable message.
///
/// Implementing it and calling [`impl_context!`] in the same module gives the
/// crate a `Context` trait with `.context()` / `.with_context()` on `Result`
/// and `Option`.
///
/// The conversion flattens the source into text, so keep it for errors whose
/// message is all a caller needs. Errors that callers classify by kind should
/// carry typed variants instead.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Prefix `source` with `context`, the way every generated `Context` impl
/// renders a wrapped failure.
pub fn prefixed(context: &str, source: &dyn std::fmt::Display) -> String {
    format!("{context}: {source}")
}

/// Generate a crate-local `Context` trait.
///
/// The calling module must define `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // crates/config/src/error.rs
/// courier_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.with_context(|| context)
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let message = $crate::error::prefixed(&f().into(), &source);
                    <Error as $crate::FromMessage>::from_message(message)
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.with_context(|| context)
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
