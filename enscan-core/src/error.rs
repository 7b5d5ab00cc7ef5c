//! Error types shared by every component of the engine.

use std::fmt;

/// Result type returned by all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced by the capture/correlation engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Additional detail, e.g. the underlying OS error text.
    pub message: String,
}

impl Error {
    /// Builds an error with no extra detail attached.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    /// Builds an error carrying additional free-text detail, e.g. an OS error string.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

/// Error kind, in domain terms rather than transport terms.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq, strum::EnumString)]
#[non_exhaustive]
pub enum ErrorKind {
    /// invalid Bluetooth address: {0}
    #[strum(disabled)]
    InvalidAddress(String),
    /// invalid hex string: {0}
    #[strum(disabled)]
    InvalidHex(String),
    /// wrong length for {what}: expected {expected} hex characters, got {got}
    #[strum(disabled)]
    InvalidHexLength { what: &'static str, expected: usize, got: usize },
    /// wrong number of arguments
    WrongArgumentCount,
    /// unknown command: {0}
    #[strum(disabled)]
    UnknownCommand(String),
    /// no Bluetooth device selected; run 'dev' first
    NoDeviceSelected,
    /// Bluetooth device error: {0}
    #[strum(disabled)]
    Device(String),
    /// HCI transport error: {0}
    #[strum(disabled)]
    Transport(String),
    /// the stream store has reached its capacity of {0} streams
    #[strum(disabled)]
    CapacityExceeded(usize),
    /// malformed CSV data: {0}
    #[strum(disabled)]
    Csv(String),
    /// internal error: {0}
    #[strum(disabled)]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::with_message(ErrorKind::Device(err.kind().to_string()), err.to_string())
    }
}

impl From<crate::address::InvalidAddress> for Error {
    fn from(err: crate::address::InvalidAddress) -> Self {
        Self::new(ErrorKind::InvalidAddress(err.0))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Self::with_message(ErrorKind::InvalidHex(String::new()), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let err = Error::with_message(ErrorKind::Device("ioctl".into()), "permission denied");
        assert_eq!(err.to_string(), "Bluetooth device error: ioctl: permission denied");
    }

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::NoDeviceSelected);
        assert_eq!(err.to_string(), "no Bluetooth device selected; run 'dev' first");
    }
}
