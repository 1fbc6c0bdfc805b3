use thiserror::Error;

/// A single inbound event could not be interpreted.
///
/// Frame errors are always local to the event that produced them: the
/// dispatcher logs and drops the event and carries on with the next frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} is not valid in the wire charset")]
    InvalidEncoding {
        field: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("Unexpected value for {field}: {value}")]
    UnexpectedValue { field: &'static str, value: String },
}

/// Conversion between the wire charset and UTF-8 failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Character {0:?} cannot be represented in the wire charset")]
    Unrepresentable(char),

    #[error("Byte 0x{0:02x} is not valid in the wire charset")]
    Undecodable(u8),
}
