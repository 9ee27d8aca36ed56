use failure::Fail;
use std::io;

pub type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Fail)]
pub enum VmError {
    #[fail(display = "invalid image: {}", _0)]
    ImageInvalid(String),

    #[fail(display = "invalid bytecode: {}", _0)]
    BytecodeInvalid(String),

    #[fail(display = "resource exhausted: {}", _0)]
    ResourceExhausted(String),

    #[fail(display = "index {} out of range for array of length {}", index, length)]
    IndexOutOfRange { index: i32, length: usize },

    #[fail(display = "heap corruption: {}", _0)]
    HeapCorruption(String),

    #[fail(display = "null reference: {}", _0)]
    NullReference(String),

    #[fail(display = "invalid cast from {} to {}", from, to)]
    InvalidCast { from: String, to: String },

    #[fail(display = "division by zero")]
    DivideByZero,

    #[fail(display = "i/o error: {}", _0)]
    Io(#[cause] io::Error),
}

impl VmError {
    pub fn image<S: Into<String>>(msg: S) -> Self {
        VmError::ImageInvalid(msg.into())
    }

    pub fn bytecode<S: Into<String>>(msg: S) -> Self {
        VmError::BytecodeInvalid(msg.into())
    }

    pub fn exhausted<S: Into<String>>(msg: S) -> Self {
        VmError::ResourceExhausted(msg.into())
    }

    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        VmError::HeapCorruption(msg.into())
    }

    pub fn null<S: Into<String>>(msg: S) -> Self {
        VmError::NullReference(msg.into())
    }

    /// Truncated or garbled input while decoding an image is a malformed image, not an
    /// environment failure.
    pub fn from_decode(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                VmError::ImageInvalid(err.to_string())
            }
            _ => VmError::Io(err),
        }
    }
}

impl From<io::Error> for VmError {
    fn from(err: io::Error) -> Self {
        VmError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_image_errors() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        assert!(matches!(VmError::from_decode(eof), VmError::ImageInvalid(_)));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(VmError::from_decode(denied), VmError::Io(_)));
    }

    #[test]
    fn messages_name_the_condition() {
        let err = VmError::IndexOutOfRange { index: 10, length: 10 };
        assert_eq!(
            err.to_string(),
            "index 10 out of range for array of length 10"
        );
        assert_eq!(VmError::DivideByZero.to_string(), "division by zero");
    }
}
