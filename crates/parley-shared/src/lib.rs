//! # parley-shared
//!
//! Wire vocabulary shared by the Parley server and its clients: the
//! [`Envelope`](protocol::Envelope) frame, its [`Kind`](protocol::Kind)
//! tags, id newtypes, and the length-prefixed codec.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use codec::EnvelopeCodec;
pub use error::ProtocolError;
pub use protocol::{Envelope, Kind, ListPayload};
pub use types::*;
