//! # dynt-error
//!
//! The error type dynt's compile phases report.
//!
//! The surface is deliberately small: an error knows what went wrong
//! ([`ErrorKind`]), which phase reported it, and carries the pieces of
//! input worth printing. There is no recovery or retry policy to encode;
//! the driver surfaces the error and stops, and runtime faults abort the
//! process without ever constructing one of these.
//!
//! ## Usage
//!
//! ```rust
//! use dynt_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::SyntaxError, "unexpected token")
//!         .with_operation("parser::parse_statement")
//!         .with_context("lexeme", "}"))
//! }
//! ```

mod error;
mod kind;

pub use error::Error;
pub use kind::ErrorKind;

/// Result type alias using dynt Error
pub type Result<T> = std::result::Result<T, Error>;
