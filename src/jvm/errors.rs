use super::class_file::ConstantPoolOverflow;
use super::UnqualifiedName;

#[derive(Debug)]
pub enum Error {
    /// A class file format limit was exceeded
    ///
    /// The message is the first limit which was hit while generating the class. Once this has
    /// happened, the class can no longer be serialized.
    LimitExceeded(String),

    /// A method was never completed
    MethodNotCompleted(UnqualifiedName),

    IoError(std::io::Error),
    MalformedName(String),
    BadDescriptor(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::LimitExceeded(overflow.to_string())
    }
}
