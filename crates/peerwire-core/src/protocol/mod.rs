//! Protocol module containing the frame types and the binary codec.

pub mod codec;
pub mod frames;

pub use codec::{decode_frame, encode_frame, CodecError};
pub use frames::*;
