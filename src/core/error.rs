//! Errors raised by route steps.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error returned by a before/handler/after/decorator step.
///
/// Any `std::error::Error` converts into it, so steps can use `?` freely.
/// The status code is resolved by the router's error codes unless one is
/// set explicitly.
pub struct HandlerError {
    status: Option<StatusCode>,
    source: BoxError,
}

impl HandlerError {
    /// Error with an explicit status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            source: Box::new(StatusError::with_message(status, message)),
        }
    }

    /// Error with an explicit status and the reason phrase as message.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            source: Box::new(StatusError::new(status)),
        }
    }

    /// Wrap an already boxed error.
    pub fn boxed(source: BoxError) -> Self {
        Self {
            status: None,
            source,
        }
    }

    /// Plain message; resolves to 500 unless mapped otherwise.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::boxed(message.into())
    }

    /// Error for a caught panic payload.
    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self {
            status: Some(StatusCode::INTERNAL_SERVER_ERROR),
            source: Box::new(PanicError(message)),
        }
    }

    /// Override the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Explicit status, if any.
    pub fn explicit_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The underlying error.
    pub fn source_error(&self) -> &(dyn StdError + 'static) {
        &*self.source
    }

    /// Check whether the underlying error, or anything in its source
    /// chain, is an `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.find::<E>().is_some()
    }

    /// First `E` in the source chain.
    pub fn find<E: StdError + 'static>(&self) -> Option<&E> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self.source_error());
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }

    pub fn into_inner(self) -> BoxError {
        self.source
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            status: None,
            source: Box::new(err),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("status", &self.status)
            .field("source", &self.source)
            .finish()
    }
}

/// An error that carries its HTTP status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusError {
    pub status: StatusCode,
    pub message: Option<String>,
}

impl StatusError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => f.write_str(message),
            None => f.write_str(self.status.canonical_reason().unwrap_or("Unknown Status")),
        }
    }
}

impl StdError for StatusError {}

/// A panic caught at the pipeline boundary.
#[derive(Debug)]
pub struct PanicError(pub String);

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}", self.0)
    }
}

impl StdError for PanicError {}

/// Result type alias for route steps.
pub type Result<T> = std::result::Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: &str) -> Result<i32> {
        Ok(value.parse::<i32>()?)
    }

    #[test]
    fn test_question_mark_conversion() {
        let err = parse("abc").unwrap_err();
        assert!(err.is::<std::num::ParseIntError>());
        assert_eq!(err.explicit_status(), None);
        assert_eq!(err.to_string(), "invalid digit found in string");
    }

    #[test]
    fn test_status_errors() {
        let err = HandlerError::status(StatusCode::NOT_FOUND);
        assert_eq!(err.explicit_status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.to_string(), "Not Found");

        let err = HandlerError::new(StatusCode::CONFLICT, "already exists");
        assert_eq!(err.to_string(), "already exists");
        assert_eq!(
            err.find::<StatusError>().map(|e| e.status),
            Some(StatusCode::CONFLICT)
        );
    }

    #[test]
    fn test_panic_payloads() {
        let err = HandlerError::panic(Box::new("boom"));
        assert_eq!(err.to_string(), "handler panicked: boom");
        assert_eq!(err.explicit_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

        let err = HandlerError::panic(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "handler panicked: owned");

        let err = HandlerError::panic(Box::new(42u8));
        assert!(err.is::<PanicError>());
    }

    #[test]
    fn test_msg_and_override() {
        let err = HandlerError::msg("database down").with_status(StatusCode::BAD_GATEWAY);
        assert_eq!(err.explicit_status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(err.to_string(), "database down");
    }
}
