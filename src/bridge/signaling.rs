//! Call-control signaling toward the telephony transport.
//!
//! All outbound traffic for a connection goes through its leg's channel, so
//! the connection's sender task is the only writer to the socket.

use tracing::trace;

use super::leg::Leg;
use crate::core::telephony::messages::{OutboundMark, OutboundMedia};
use crate::core::telephony::{AudioCodec, MarkName, MediaStreamRoute, TelephonyOutgoingMessage};
use crate::errors::{BridgeError, BridgeResult};

impl Leg {
    async fn send_route(&self, message: TelephonyOutgoingMessage) -> BridgeResult<()> {
        self.outbound()
            .send(MediaStreamRoute::Outgoing(message))
            .await
            .map_err(|_| BridgeError::ChannelClosed(self.stream_sid().to_string()))
    }

    /// Send wire-encoded audio as one `media` message.
    pub async fn send_media(&self, wire: &[u8]) -> BridgeResult<()> {
        trace!(stream_sid = %self.stream_sid(), bytes = wire.len(), "media out");
        self.send_route(TelephonyOutgoingMessage::Media {
            stream_sid: self.stream_sid().to_string(),
            media: OutboundMedia {
                payload: AudioCodec::encode_payload(wire),
            },
        })
        .await
    }

    pub async fn send_mark(&self, mark: &MarkName) -> BridgeResult<()> {
        trace!(stream_sid = %self.stream_sid(), mark = %mark, "mark out");
        self.send_route(TelephonyOutgoingMessage::Mark {
            stream_sid: self.stream_sid().to_string(),
            mark: OutboundMark {
                name: mark.to_string(),
            },
        })
        .await
    }

    /// Tell the transport to drop everything buffered for playback.
    pub async fn send_clear(&self) -> BridgeResult<()> {
        self.send_route(TelephonyOutgoingMessage::Clear {
            stream_sid: self.stream_sid().to_string(),
        })
        .await
    }
}
