use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by patina.
///
/// Errors only occur in non-real-time operations such as sample loading or
/// parameter validation: the audio path clamps degenerate input instead of
/// failing.
#[derive(Debug)]
pub enum Error {
    ParameterError(String),
    SampleBufferError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::SampleBufferError(str) => write!(f, "Invalid sample data: {str}"),
        }
    }
}
