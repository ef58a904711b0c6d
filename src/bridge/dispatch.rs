//! Routing of AI session events to legs.
//!
//! One function decides, for an event produced by the session serving
//! `direction` of `pair`, which leg it touches and what is sent there. Events
//! of one session are handled strictly in order by that session's pump.

use tracing::{debug, trace, warn};

use super::alerts::AlertKind;
use super::interruption;
use super::leg::{ChunkDecision, Leg};
use super::pair::Pair;
use super::role::Direction;
use crate::core::realtime::{RealtimeAudioData, RealtimeEvent, SpeechEvent};
use crate::core::telephony::MarkName;

/// Apply one event from the session serving `direction`.
pub async fn handle_realtime_event(pair: &Pair, direction: Direction, event: RealtimeEvent) {
    match event {
        RealtimeEvent::AudioDelta(audio) => forward_audio(pair, direction, audio).await,
        RealtimeEvent::AudioDone { item_id } => finish_utterance(pair, direction, &item_id).await,
        RealtimeEvent::Speech(SpeechEvent::Started { audio_start_ms, .. }) => {
            debug!(
                pairing_key = %pair.key(),
                direction = %direction,
                audio_start_ms,
                "Speech started"
            );
            barge_in(pair, direction).await;
        }
        RealtimeEvent::Speech(SpeechEvent::Stopped { audio_end_ms, .. }) => {
            debug!(
                pairing_key = %pair.key(),
                direction = %direction,
                audio_end_ms,
                "Speech stopped"
            );
            if pair.settings().manual_turns
                && let Some(session) = pair.session(direction)
                && let Err(e) = session.create_response().await
            {
                warn!(direction = %direction, "Failed to request response: {}", e);
            }
        }
        RealtimeEvent::Transcript { text, role } => {
            debug!(pairing_key = %pair.key(), direction = %direction, role = %role, "Transcript: {}", text);
        }
        RealtimeEvent::ResponseDone { response_id } => {
            debug!(pairing_key = %pair.key(), direction = %direction, response_id = %response_id, "Response done");
        }
        RealtimeEvent::Error(e) => {
            warn!(pairing_key = %pair.key(), direction = %direction, "Realtime session error: {}", e);
            if let Some(session) = pair.session(direction) {
                session.alert(AlertKind::ProviderError, e.to_string());
            }
        }
        RealtimeEvent::Closed => {
            warn!(pairing_key = %pair.key(), direction = %direction, "Realtime session closed upstream");
            if let Some(session) = pair.session(direction)
                && !session.is_closed()
            {
                session.mark_upstream_closed();
                session.alert(AlertKind::SessionClosed, "upstream connection closed");
            }
        }
    }
}

/// Deliver one generated chunk to the target leg: preempt a still-playing
/// utterance if this starts a new one, then media, then its tracking mark.
async fn forward_audio(pair: &Pair, direction: Direction, audio: RealtimeAudioData) {
    let Some(leg) = pair.leg(direction.target()) else {
        trace!(
            pairing_key = %pair.key(),
            direction = %direction,
            item_id = %audio.item_id,
            "No target leg; dropping audio"
        );
        return;
    };

    if leg.is_suppressed(&audio.item_id) {
        trace!(item_id = %audio.item_id, "Dropping audio of interrupted item");
        return;
    }
    let wire = match leg.codec().outbound(&audio.item_id, &audio.data) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(item_id = %audio.item_id, "Dropping unconvertible audio: {}", e);
            return;
        }
    };
    if wire.is_empty() {
        return;
    }
    send_chunk(pair, direction, &leg, &audio.item_id, &wire).await;
}

/// Record, send and mark one wire chunk of `item_id`.
async fn send_chunk(pair: &Pair, direction: Direction, leg: &Leg, item_id: &str, wire: &[u8]) {
    let chunk = match leg.record_outbound_chunk(item_id, wire.len()) {
        ChunkDecision::Send { chunk, preempted } => {
            if let Some(snapshot) = preempted {
                let session = pair.session(direction);
                interruption::truncate_playback(
                    leg,
                    session.as_deref(),
                    &snapshot,
                    pair.settings().playback_allowance_ms,
                )
                .await;
            }
            chunk
        }
        ChunkDecision::Drop => {
            trace!(item_id = %item_id, "Dropping audio of interrupted item");
            return;
        }
    };

    if let Some(session) = pair.session(direction) {
        session.set_speaking(true);
    }

    if let Err(e) = leg.send_media(wire).await {
        debug!(stream_sid = %leg.stream_sid(), "Target leg gone: {}", e);
        return;
    }
    if let Err(e) = leg.send_mark(&MarkName::progress(item_id, chunk)).await {
        debug!(stream_sid = %leg.stream_sid(), "Target leg gone: {}", e);
    }
}

/// The provider finished generating `item_id`: play out whatever the
/// resampler still holds, then mark completion.
async fn finish_utterance(pair: &Pair, direction: Direction, item_id: &str) {
    if let Some(leg) = pair.leg(direction.target()) {
        let playing = !leg.is_suppressed(item_id) && leg.current_item().as_deref() == Some(item_id);
        if playing {
            match leg.codec().finish_outbound(item_id) {
                Ok(tail) if !tail.is_empty() => {
                    send_chunk(pair, direction, &leg, item_id, &tail).await;
                }
                Ok(_) => {}
                Err(e) => warn!(item_id = %item_id, "Dropping utterance tail: {}", e),
            }
            if let Err(e) = leg.send_mark(&MarkName::done(item_id)).await {
                debug!(stream_sid = %leg.stream_sid(), "Target leg gone: {}", e);
            }
        }
        leg.item_generated(item_id);
    }
    if let Some(session) = pair.session(direction) {
        session.set_speaking(false);
    }
}

/// The source of `direction` started talking: stop whatever is playing to
/// that speaker. It hears the output of the session targeting its role.
async fn barge_in(pair: &Pair, direction: Direction) {
    let speaker = direction.source();
    let Some(leg) = pair.leg(speaker) else {
        return;
    };
    let session = pair.session(Direction::to_target(speaker));
    interruption::interrupt(
        &leg,
        session.as_deref(),
        pair.settings().playback_allowance_ms,
    )
    .await;
}
