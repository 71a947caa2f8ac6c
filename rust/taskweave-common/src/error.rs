use std::{any::Any, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn disposed(name: impl Into<String>) -> Error {
        Error(ErrorKind::Disposed { name: name.into() }.into())
    }

    pub fn timeout(name: impl Into<String>, timeout: Duration) -> Error {
        Error(
            ErrorKind::Timeout {
                name: name.into(),
                timeout,
            }
            .into(),
        )
    }

    pub fn work_fault(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::WorkFault {
                message: message.into(),
                source: None,
            }
            .into(),
        )
    }

    /// Wraps an error raised by user code inside a unit of work.
    pub fn work_fault_from<E>(message: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::WorkFault {
                message: message.into(),
                source: Some(Box::new(source)),
            }
            .into(),
        )
    }

    /// Converts a caught panic payload into a `WorkFault`, keeping the panic message
    /// when the payload is a string.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Error {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Error::work_fault(format!("panicked: {message}"))
    }

    pub fn not_implemented(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::NotImplemented {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidArgument { .. })
    }

    pub fn is_invalid_operation(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidOperation { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.kind(), ErrorKind::Disposed { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout { .. })
    }

    pub fn is_work_fault(&self) -> bool {
        matches!(self.kind(), ErrorKind::WorkFault { .. })
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotImplemented { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("'{name}' has been disposed")]
    Disposed { name: String },

    #[error("'{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("work fault: {message}")]
    WorkFault {
        message: String,
        #[source]
        source: Option<StdErrorBoxed>,
    },

    #[error("not yet implemented: {message}")]
    NotImplemented { message: String },

    #[error("IO error for '{context}': {source}'")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Error, ErrorKind};

    #[test]
    fn test_error_display() {
        let e = Error::invalid_arg("count", "count >= 0");
        assert_eq!(e.to_string(), "invalid argument count: count >= 0");
        assert!(e.is_invalid_argument());

        let e = Error::timeout("latch", Duration::from_millis(10));
        assert_eq!(e.to_string(), "'latch' timed out after 10ms");
        assert!(e.is_timeout());

        let e = Error::disposed("latch");
        assert!(e.is_disposed());
        assert!(!e.is_invalid_operation());
    }

    #[test]
    fn test_from_panic() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        let e = Error::from_panic(payload);
        assert!(e.is_work_fault());
        assert_eq!(e.to_string(), "work fault: panicked: boom 1");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();
        let e = Error::from_panic(payload);
        match e.into_kind() {
            ErrorKind::WorkFault { message, source } => {
                assert!(message.contains("non-string"));
                assert!(source.is_none());
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_work_fault_source() {
        let io = std::io::Error::other("disk gone");
        let e = Error::work_fault_from("unit 3", io);
        let source = std::error::Error::source(&e).expect("source");
        assert_eq!(source.to_string(), "disk gone");
    }
}
