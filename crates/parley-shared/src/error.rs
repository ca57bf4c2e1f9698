use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame encoding failed: {0}")]
    Encode(bincode::Error),

    #[error("Frame decoding failed: {0}")]
    Decode(bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
