use std::borrow::Cow;

/// All `bond-bridge` error kinds.
///
/// Every kind describes a hard failure, an outcome the bridge protocol does
/// not anticipate. Expected failures, such as a timeout or a bridge replying
/// with a non-success status, are never reported as errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A request could not be built or sent for a reason other than a
    /// network failure.
    Request,
    /// A bridge replied with a body which is not valid `JSON`.
    JsonResponse,
    /// The data returned by a bridge does not have the expected shape.
    InvalidData,
    /// An input/output error on a local resource.
    Io,
    /// The discovery process failed.
    Discovery,
    /// A push listener could not be managed.
    Push,
    /// A bridge could not be found in the controller.
    Controller,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::JsonResponse => "Json Response",
            Self::InvalidData => "Invalid Data",
            Self::Io => "Input/Output",
            Self::Discovery => "Discovery",
            Self::Push => "Push Listener",
            Self::Controller => "Controller",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A `bond-bridge` error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::new(ErrorKind::Request, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::JsonResponse, e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

impl From<mdns_sd::Error> for Error {
    fn from(e: mdns_sd::Error) -> Self {
        Self::new(ErrorKind::Discovery, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};

    #[test]
    fn error_display() {
        let error = Error::new(ErrorKind::JsonResponse, "expected an object");

        assert_eq!(error.kind(), ErrorKind::JsonResponse);
        assert_eq!(error.info(), "expected an object");
        assert_eq!(error.to_string(), "Json Response: expected an object");
        assert_eq!(format!("{error:?}"), "Json Response: expected an object");
    }

    #[test]
    fn io_error_conversion() {
        let error: Error = std::io::Error::other("socket closed").into();

        assert_eq!(error.kind(), ErrorKind::Io);
        assert_eq!(error.info(), "socket closed");
    }
}
