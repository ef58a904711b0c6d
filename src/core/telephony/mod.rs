//! Telephony media-stream contract: wire messages, audio codec and mark names.

pub mod codec;
pub mod mark;
pub mod messages;

pub use codec::{AudioCodec, CodecError, TelephonyEncoding};
pub use mark::{MarkName, MarkParseError};
pub use messages::{
    CustomParameters, MediaFormat, MediaPayload, MediaStreamRoute, StreamStart,
    TelephonyIncomingMessage, TelephonyOutgoingMessage, TelephonyValidationError,
};
