use thiserror::Error;

/// Errors produced while decoding bencoded input.
///
/// Every variant carries the byte offset at which decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("invalid integer at offset {0}")]
    InvalidInteger(usize),

    #[error("invalid string length at offset {0}")]
    InvalidLength(usize),

    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    #[error("dictionary key is not a byte string at offset {0}")]
    NonStringKey(usize),

    #[error("trailing data at offset {0}")]
    TrailingData(usize),

    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}
