//! Protocol module containing message types, the JSON-lines codec, and
//! stream framing.

pub mod codec;
pub mod framing;
pub mod messages;

pub use codec::{
    auth_from_envelope, auth_to_envelope, decode_announcement, decode_auth_message, decode_frame,
    encode_announcement, encode_auth_message, encode_frame, from_payload, to_payload, ProtocolError,
};
pub use framing::{FrameDecoder, DEFAULT_MAX_FRAME_BYTES};
pub use messages::*;
