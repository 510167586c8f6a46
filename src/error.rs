//! The result type threaded through the whole table layer.
//!
//! `StatusCode` enumerates the error boundary named in the spec's external
//! interfaces: `NotFound`, `Corruption`, `InvalidArgument`, `IoError`,
//! `NotSupported`. There is no `Ok` variant; a successful outcome is simply
//! `Result::Ok`.

use std::io;

use thiserror::Error;

/// A failure mode of a table-layer operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusCode {
    NotFound,
    Corruption,
    InvalidArgument,
    IoError,
    NotSupported,
}

/// An error produced by the table layer, carrying both a machine-readable
/// [`StatusCode`] and a human-readable message.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{code:?}: {msg}")]
pub struct Status {
    pub code: StatusCode,
    msg: String,
}

impl Status {
    pub fn new(code: StatusCode, msg: impl Into<String>) -> Status {
        Status {
            code,
            msg: msg.into(),
        }
    }

    /// Prefixes the error message with additional context, keeping the code.
    pub fn annotate(self, ctx: impl AsRef<str>) -> Status {
        Status {
            code: self.code,
            msg: format!("{}: {}", ctx.as_ref(), self.msg),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Status>;

/// Shorthand for constructing an `Err(Status::new(..))`.
pub fn err<T>(code: StatusCode, msg: impl Into<String>) -> Result<T> {
    Err(Status::new(code, msg))
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Status {
        let code = match e.kind() {
            io::ErrorKind::NotFound => StatusCode::NotFound,
            io::ErrorKind::InvalidData => StatusCode::Corruption,
            io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
                StatusCode::InvalidArgument
            }
            _ => StatusCode::IoError,
        };
        Status::new(code, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let s = Status::new(StatusCode::Corruption, "bad crc");
        assert_eq!(format!("{}", s), "Corruption: bad crc");
    }

    #[test]
    fn test_annotate_keeps_code() {
        let s = Status::new(StatusCode::IoError, "short read").annotate("reading footer");
        assert_eq!(s.code, StatusCode::IoError);
        assert_eq!(format!("{}", s), "IoError: reading footer: short read");
    }
}
