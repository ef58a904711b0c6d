//! Barge-in: cut the AI utterance at the point the listener actually heard.
//!
//! Generation runs ahead of playback, so the cut point comes from the
//! acknowledged marks plus a fixed allowance, capped at what was sent. The
//! downstream `clear` and the upstream truncate are always issued together.
//! A barge-in also cancels the response still being generated; a preempting
//! utterance does not, since it belongs to the live response.

use tracing::{debug, warn};

use super::leg::{Leg, PlaybackSnapshot};
use super::session::AiSession;

/// Milliseconds of `snapshot` the listener has heard, plus `allowance_ms`,
/// never beyond what was sent.
pub fn played_ms(snapshot: &PlaybackSnapshot, bytes_per_ms: u64, allowance_ms: u64) -> u32 {
    let bytes_per_ms = bytes_per_ms.max(1);
    let heard = snapshot.acked_bytes / bytes_per_ms + allowance_ms;
    let sent = snapshot.sent_bytes / bytes_per_ms;
    u32::try_from(heard.min(sent)).unwrap_or(u32::MAX)
}

/// Interrupt whatever is playing to `leg`. Returns `false` without touching
/// the transport or the session when nothing is playing.
pub async fn interrupt(leg: &Leg, session: Option<&AiSession>, allowance_ms: u64) -> bool {
    let Some(snapshot) = leg.take_active_playback() else {
        return false;
    };
    if let Some(session) = session
        && session.is_speaking()
        && let Err(e) = session.cancel_response().await
    {
        warn!(
            item_id = %snapshot.item_id,
            direction = %session.direction(),
            "Failed to cancel AI response: {}",
            e
        );
    }
    truncate_playback(leg, session, &snapshot, allowance_ms).await;
    true
}

/// Clear `leg`'s playback buffer and truncate the snapshot's item upstream.
/// Failures are logged; the caller carries on either way.
pub async fn truncate_playback(
    leg: &Leg,
    session: Option<&AiSession>,
    snapshot: &PlaybackSnapshot,
    allowance_ms: u64,
) {
    let audio_end_ms = played_ms(snapshot, leg.codec().encoding().bytes_per_ms(), allowance_ms);
    debug!(
        stream_sid = %leg.stream_sid(),
        item_id = %snapshot.item_id,
        acked_chunks = snapshot.acked_chunks,
        audio_end_ms,
        "Interrupting playback"
    );

    if let Err(e) = leg.send_clear().await {
        warn!(stream_sid = %leg.stream_sid(), "Failed to send clear: {}", e);
    }

    let Some(session) = session else {
        return;
    };
    if let Err(e) = session.truncate(&snapshot.item_id, audio_end_ms).await {
        warn!(
            item_id = %snapshot.item_id,
            direction = %session.direction(),
            "Failed to truncate AI item: {}",
            e
        );
    }
    session.set_speaking(false);
}
