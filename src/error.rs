// src/error.rs

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid hex string: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("text is {len} bytes, at most {max} fit a short NDEF record")]
    TextTooLong { len: usize, max: usize },

    #[error("read of {length} bytes at offset {offset} exceeds file size {size}")]
    ReadOutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("card returned status {0:02X?}")]
    Status([u8; 2]),

    #[error("malformed NDEF: {0}")]
    MalformedNdef(String),

    #[error("malformed capability container: {0}")]
    MalformedCapabilityContainer(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("account unavailable: {0}")]
    Account(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<pcsc::Error> for Error {
    fn from(error: pcsc::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
