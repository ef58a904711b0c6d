pub mod realtime;
pub mod telephony;

pub use realtime::{
    BaseRealtime, BoxedRealtime, OpenAIRealtime, RealtimeConfig, RealtimeError, RealtimeEvent,
    RealtimeProvider, RealtimeResult, create_realtime_provider, get_supported_realtime_providers,
};

pub use telephony::{
    AudioCodec, CodecError, MarkName, TelephonyEncoding, TelephonyIncomingMessage,
    TelephonyOutgoingMessage,
};
