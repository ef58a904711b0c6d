//! Bridge Session Controller.
//!
//! One controller per telephony connection. It consumes the connection's
//! inbound events one at a time and moves through
//! `AwaitingStart -> Streaming -> Closed`; there is no way back to
//! `AwaitingStart`. Returning [`ControlFlow::Break`] tells the connection
//! handler to close the socket.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::leg::{AckOutcome, Leg};
use super::pair::Pair;
use super::registry::PairingRegistry;
use super::role::{Direction, Role};
use crate::core::telephony::{
    AudioCodec, CustomParameters, MarkName, MediaStreamRoute, StreamStart, TelephonyEncoding,
    TelephonyIncomingMessage,
};
use crate::errors::{BridgeError, BridgeResult};

/// How a leg joins the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// Two-leg call under a pairing key
    Paired { key: String, role: Role },
    /// Single caller with an assistant
    Solo,
}

/// Decide the topology from `start` parameters. Neither key nor role, or
/// role `solo`, is single-leg; a key with `a`/`b` is two-leg; anything in
/// between is a pairing error.
pub fn resolve_topology(params: &CustomParameters) -> BridgeResult<Topology> {
    let key = params
        .pairing_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let role = params
        .role
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    match (key, role) {
        (None, None) => Ok(Topology::Solo),
        (_, Some(role)) if Role::parse(role)? == Role::Solo => Ok(Topology::Solo),
        (Some(key), Some(role)) => Ok(Topology::Paired {
            key: key.to_string(),
            role: Role::parse(role)?,
        }),
        (Some(_), None) => Err(BridgeError::MissingPairingMetadata(
            "pairing key without role".to_string(),
        )),
        (None, Some(_)) => Err(BridgeError::MissingPairingMetadata(
            "role without pairing key".to_string(),
        )),
    }
}

struct StreamContext {
    leg: Arc<Leg>,
    pair: Arc<Pair>,
    topology: Topology,
}

enum ControllerState {
    AwaitingStart,
    Streaming(StreamContext),
    Closed,
}

pub struct BridgeController {
    registry: Arc<PairingRegistry>,
    outbound: mpsc::Sender<MediaStreamRoute>,
    state: ControllerState,
}

impl BridgeController {
    /// `outbound` feeds the connection's sender task.
    pub fn new(registry: Arc<PairingRegistry>, outbound: mpsc::Sender<MediaStreamRoute>) -> Self {
        Self {
            registry,
            outbound,
            state: ControllerState::AwaitingStart,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            ControllerState::AwaitingStart => "awaiting_start",
            ControllerState::Streaming(_) => "streaming",
            ControllerState::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ControllerState::Closed)
    }

    pub fn leg(&self) -> Option<&Arc<Leg>> {
        match &self.state {
            ControllerState::Streaming(ctx) => Some(&ctx.leg),
            _ => None,
        }
    }

    pub fn pair(&self) -> Option<&Arc<Pair>> {
        match &self.state {
            ControllerState::Streaming(ctx) => Some(&ctx.pair),
            _ => None,
        }
    }

    /// Token cancelled when a newer connection supersedes this leg.
    pub fn close_requested(&self) -> Option<CancellationToken> {
        self.leg().map(|leg| leg.close_requested())
    }

    /// Parse and apply one text frame. Malformed or oversized frames are
    /// logged and dropped; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let message: TelephonyIncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparseable telephony message: {}", e);
                return ControlFlow::Continue(());
            }
        };
        if let Err(e) = message.validate_size() {
            warn!(event = message.event_name(), "Dropping oversized telephony message: {}", e);
            return ControlFlow::Continue(());
        }
        self.handle_message(message).await
    }

    pub async fn handle_message(&mut self, message: TelephonyIncomingMessage) -> ControlFlow<()> {
        match self.state {
            ControllerState::Closed => ControlFlow::Break(()),
            ControllerState::AwaitingStart => self.handle_before_start(message).await,
            ControllerState::Streaming(_) => self.handle_streaming(message).await,
        }
    }

    // ===== AwaitingStart =====

    async fn handle_before_start(&mut self, message: TelephonyIncomingMessage) -> ControlFlow<()> {
        match message {
            TelephonyIncomingMessage::Start { start, stream_sid } => {
                match self.start(start, stream_sid) {
                    Ok(ctx) => {
                        self.state = ControllerState::Streaming(ctx);
                        ControlFlow::Continue(())
                    }
                    Err(e) => {
                        warn!("Rejecting stream start: {}", e);
                        self.state = ControllerState::Closed;
                        ControlFlow::Break(())
                    }
                }
            }
            TelephonyIncomingMessage::Stop { .. } => {
                debug!("Stream stopped before start");
                self.state = ControllerState::Closed;
                ControlFlow::Break(())
            }
            other => {
                trace!(event = other.event_name(), "Ignoring event before start");
                ControlFlow::Continue(())
            }
        }
    }

    fn start(&self, start: StreamStart, top_level_sid: Option<String>) -> BridgeResult<StreamContext> {
        let topology = resolve_topology(&start.custom_parameters)?;

        let encoding = self.registry.settings().encoding;
        if let Some(format) = &start.media_format {
            let declared = TelephonyEncoding::from_media_format(&format.encoding, format.sample_rate);
            if declared != Some(encoding) {
                warn!(
                    declared = %format.encoding,
                    sample_rate = format.sample_rate,
                    configured = %encoding,
                    "Stream declares a different encoding; using configured encoding"
                );
            }
        }

        let stream_sid = start
            .stream_sid
            .or(top_level_sid)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let codec = AudioCodec::new(encoding);

        let (leg, pair) = match &topology {
            Topology::Paired { key, role } => {
                let leg = Leg::new(*role, Some(key.clone()), stream_sid, codec, self.outbound.clone());
                let pair = self.registry.attach(key, Arc::clone(&leg))?;
                (leg, pair)
            }
            Topology::Solo => {
                let leg = Leg::new(Role::Solo, None, stream_sid, codec, self.outbound.clone());
                let pair = self.registry.open_solo(Arc::clone(&leg))?;
                (leg, pair)
            }
        };
        let ctx = StreamContext { leg, pair, topology };

        info!(
            stream_sid = %ctx.leg.stream_sid(),
            call_sid = start.call_sid.as_deref().unwrap_or(""),
            leg_id = %ctx.leg.id(),
            role = %ctx.leg.role(),
            "Stream started"
        );
        Ok(ctx)
    }

    // ===== Streaming =====

    async fn handle_streaming(&mut self, message: TelephonyIncomingMessage) -> ControlFlow<()> {
        let ControllerState::Streaming(ctx) = &self.state else {
            return ControlFlow::Continue(());
        };

        match message {
            TelephonyIncomingMessage::Media {
                media,
                sequence_number,
            } => {
                let audio = match ctx.leg.codec().inbound(&media.payload) {
                    Ok(audio) => audio,
                    Err(e) => {
                        warn!(stream_sid = %ctx.leg.stream_sid(), "Dropping undecodable media: {}", e);
                        return ControlFlow::Continue(());
                    }
                };
                if audio.is_empty() {
                    // Resampler still filling its first chunk
                    return ControlFlow::Continue(());
                }
                let direction = Direction::from_source(ctx.leg.role());
                let Some(session) = ctx.pair.session(direction) else {
                    trace!(direction = %direction, "No AI session; dropping frame");
                    return ControlFlow::Continue(());
                };
                match session.send_audio(audio).await {
                    Ok(true) => {}
                    Ok(false) => trace!(
                        direction = %direction,
                        sequence = ?sequence_number.as_ref().and_then(|s| s.as_u64()),
                        "AI session not accepting audio; dropping frame"
                    ),
                    Err(e) => debug!(direction = %direction, "Failed to forward audio: {}", e),
                }
                ControlFlow::Continue(())
            }
            TelephonyIncomingMessage::Mark { mark } => {
                match MarkName::parse(&mark.name) {
                    Ok(MarkName::Progress { item_id, chunk }) => {
                        if ctx.leg.ack_progress(&item_id, chunk) != AckOutcome::Accepted {
                            trace!(mark = %mark.name, "Ignoring out-of-order or stale mark");
                        }
                    }
                    Ok(MarkName::Done { item_id }) => {
                        ctx.leg.ack_done(&item_id);
                    }
                    Err(e) => warn!(mark = %mark.name, "Ignoring malformed mark: {}", e),
                }
                ControlFlow::Continue(())
            }
            TelephonyIncomingMessage::Stop { .. } => {
                info!(stream_sid = %ctx.leg.stream_sid(), "Stream stopped");
                self.close().await;
                ControlFlow::Break(())
            }
            TelephonyIncomingMessage::Dtmf { dtmf } => {
                debug!(digit = %dtmf.digit, "Ignoring DTMF");
                ControlFlow::Continue(())
            }
            other => {
                trace!(event = other.event_name(), "Ignoring event while streaming");
                ControlFlow::Continue(())
            }
        }
    }

    /// Release this connection's leg. Idempotent; never fails.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, ControllerState::Closed);
        let ControllerState::Streaming(ctx) = state else {
            return;
        };
        match &ctx.topology {
            Topology::Paired { key, role } => {
                self.registry.detach(key, *role, ctx.leg.id()).await;
            }
            Topology::Solo => self.registry.close_solo(&ctx.pair).await,
        }
        debug!(leg_id = %ctx.leg.id(), "Controller closed");
    }
}
