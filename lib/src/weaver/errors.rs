use crate::jvm;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Snippet or argument processor code uses a context the wrong way
    InvalidContextUsage {
        /// Snippet (or processor) method and best-effort line
        location: String,
        message: String,
    },

    /// Marker that cannot be applied as configured
    InvalidMarker(String),

    /// Weaver invariant violated (eg. an instruction that should be there is not)
    Fatal(String),

    /// Two exception table entries straddle each other's boundaries
    OverlappingExceptionHandler {
        method: String,
        first: (usize, usize),
        second: (usize, usize),
    },

    /// Instrumented method does not fit in a method body anymore
    MethodTooLarge {
        owner: String,
        name: String,
        descriptor: String,
        size: usize,
        limit: usize,
    },

    Analysis(jvm::Error),

    /// Reading a listing or writing results failed
    IoError(std::io::Error),
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Analysis(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidContextUsage { location, message } => {
                write!(f, "{}: {}", location, message)
            }
            Error::InvalidMarker(msg) => write!(f, "invalid marker: {}", msg),
            Error::Fatal(msg) => write!(f, "weaver error: {}", msg),
            Error::OverlappingExceptionHandler {
                method,
                first,
                second,
            } => write!(
                f,
                "overlapping exception handler in {}: [{}, {}) and [{}, {})",
                method, first.0, first.1, second.0, second.1
            ),
            Error::MethodTooLarge {
                owner,
                name,
                descriptor,
                size,
                limit,
            } => write!(
                f,
                "method {}.{}{} not instrumented, because its size ({}) exceeds the maximal \
                 allowed method size ({})",
                owner, name, descriptor, size, limit
            ),
            Error::Analysis(err) => err.fmt(f),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Analysis(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn io_errors_keep_their_cause() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "no such listing"));
        assert!(matches!(&err, Error::IoError(cause) if cause.kind() == io::ErrorKind::NotFound));
        assert_eq!(err.to_string(), "I/O error: no such listing");
        assert!(err.source().is_some());
    }
}
