use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Malformed field or method descriptor
    BadDescriptor(String),

    /// Malformed method listing
    Listing { line: usize, message: String },

    /// A jump or exception table entry refers to a node that is not a label of the same list
    DanglingLabel(String),

    /// Data-flow analysis could not compute a consistent frame
    Analysis {
        /// Position of the offending node in the instruction list
        index: usize,
        kind: AnalysisErrorKind,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    /// Popping from an empty operand stack
    EmptyStack,

    /// Operand of the wrong width (eg. `pop` of a `long`)
    InvalidWidth(usize),

    /// Two paths reach a node with different stack heights
    IncompatibleStackHeights(usize, usize),

    /// Control falls off the end of the code
    FallsOffEnd,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
            Error::Listing { line, message } => write!(f, "line {}: {}", line, message),
            Error::DanglingLabel(msg) => write!(f, "dangling label: {}", msg),
            Error::Analysis { index, kind } => {
                write!(f, "analysis failed at instruction {}: ", index)?;
                match kind {
                    AnalysisErrorKind::EmptyStack => f.write_str("operand stack underflow"),
                    AnalysisErrorKind::InvalidWidth(w) => {
                        write!(f, "unexpected operand of width {}", w)
                    }
                    AnalysisErrorKind::IncompatibleStackHeights(a, b) => {
                        write!(f, "incompatible stack heights {} and {}", a, b)
                    }
                    AnalysisErrorKind::FallsOffEnd => f.write_str("execution falls off the code"),
                }
            }
        }
    }
}

impl std::error::Error for Error {}
